/// Contact permission matrix
///
/// Every "who may message whom" decision goes through the rule table below.
/// Adding a role means adding one row set here and one table in the directory.
use crate::backend::DirectoryFilter;
use crate::contact_resolver::Contact;
use crate::identity::{Identity, Role};
use serde::Serialize;

/// Domain constraint attached to a counterpart role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainScope {
    /// Any domain, including contacts without one
    Any,
    /// Only contacts sharing the caller's domain
    SameDomain,
}

/// One row of the matrix: the caller may message `counterpart` within `scope`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContactRule {
    pub counterpart: Role,
    pub scope: DomainScope,
}

const fn rule(counterpart: Role, scope: DomainScope) -> ContactRule {
    ContactRule { counterpart, scope }
}

const SUPER_ADMIN_RULES: &[ContactRule] = &[rule(Role::Admin, DomainScope::Any)];

const ADMIN_RULES: &[ContactRule] = &[
    rule(Role::SuperAdmin, DomainScope::Any),
    rule(Role::Admin, DomainScope::Any),
    rule(Role::Worker, DomainScope::SameDomain),
];

const WORKER_RULES: &[ContactRule] = &[
    rule(Role::Admin, DomainScope::SameDomain),
    rule(Role::Worker, DomainScope::SameDomain),
];

/// Rules for a caller role, in contact-list order
pub fn contact_rules(role: Role) -> &'static [ContactRule] {
    match role {
        Role::SuperAdmin => SUPER_ADMIN_RULES,
        Role::Admin => ADMIN_RULES,
        Role::Worker => WORKER_RULES,
    }
}

impl ContactRule {
    /// Directory query for this row. `None` when the row cannot match anyone
    /// (same-domain row for a caller without a domain).
    pub fn directory_query(&self, identity: &Identity) -> Option<Option<DirectoryFilter>> {
        match self.scope {
            DomainScope::Any => Some(None),
            DomainScope::SameDomain => identity
                .domain
                .as_ref()
                .map(|d| Some(DirectoryFilter::domain(d.clone()))),
        }
    }

    /// Whether a directory entry satisfies this row for the caller. Self never does.
    pub fn admits(&self, identity: &Identity, contact: &Contact) -> bool {
        if contact.role != self.counterpart || identity.is_self(&contact.email) {
            return false;
        }
        match self.scope {
            DomainScope::Any => true,
            DomainScope::SameDomain => match (&identity.domain, &contact.domain) {
                (Some(mine), Some(theirs)) => mine == theirs,
                _ => false,
            },
        }
    }
}

/// True if any row of the caller's matrix admits `contact`
pub fn can_message(identity: &Identity, contact: &Contact) -> bool {
    contact_rules(identity.role)
        .iter()
        .any(|r| r.admits(identity, contact))
}

/// Role-level capabilities beyond the contact matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolePermissions {
    pub can_view_all_chats: bool,
    /// May soft-delete messages sent by others
    pub can_delete_messages: bool,
    pub description: &'static str,
}

pub fn role_permissions(role: Role) -> RolePermissions {
    match role {
        Role::SuperAdmin => RolePermissions {
            can_view_all_chats: true,
            can_delete_messages: true,
            description: "Can chat with admins in every domain",
        },
        Role::Admin => RolePermissions {
            can_view_all_chats: false,
            can_delete_messages: false,
            description: "Can chat with super admins, all admins and workers in the same domain",
        },
        Role::Worker => RolePermissions {
            can_view_all_chats: false,
            can_delete_messages: false,
            description: "Can chat with admins and workers in the same domain",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(email: &str, role: Role, domain: Option<&str>) -> Contact {
        Contact {
            id: email.to_string(),
            name: email.to_string(),
            email: email.to_string(),
            role,
            domain: domain.map(str::to_string),
        }
    }

    #[test]
    fn test_super_admin_reaches_only_admins() {
        let me = Identity::new("s", "root@org.io", Role::SuperAdmin, None);
        assert!(can_message(&me, &contact("a@org.io", Role::Admin, Some("HR"))));
        assert!(can_message(&me, &contact("b@org.io", Role::Admin, Some("IT"))));
        assert!(!can_message(&me, &contact("w@org.io", Role::Worker, Some("HR"))));
        assert!(!can_message(&me, &contact("s2@org.io", Role::SuperAdmin, None)));
    }

    #[test]
    fn test_worker_same_domain_only() {
        let me = Identity::new("w", "w1@org.io", Role::Worker, Some("HR".to_string()));
        assert!(can_message(&me, &contact("a@org.io", Role::Admin, Some("HR"))));
        assert!(!can_message(&me, &contact("a2@org.io", Role::Admin, Some("IT"))));
        assert!(can_message(&me, &contact("w2@org.io", Role::Worker, Some("HR"))));
        assert!(!can_message(&me, &contact("w1@org.io", Role::Worker, Some("HR"))));
        assert!(!can_message(&me, &contact("root@org.io", Role::SuperAdmin, None)));
    }

    #[test]
    fn test_same_domain_rows_skipped_without_domain() {
        let me = Identity::new("w", "w1@org.io", Role::Worker, None);
        for r in contact_rules(me.role) {
            assert!(r.directory_query(&me).is_none());
        }
        let admin = Identity::new("a", "a@org.io", Role::Admin, None);
        let queries: Vec<_> = contact_rules(admin.role)
            .iter()
            .map(|r| r.directory_query(&admin))
            .collect();
        assert_eq!(queries, vec![Some(None), Some(None), None]);
    }

    #[test]
    fn test_only_super_admin_moderates() {
        assert!(role_permissions(Role::SuperAdmin).can_delete_messages);
        assert!(!role_permissions(Role::Admin).can_delete_messages);
        assert!(!role_permissions(Role::Worker).can_delete_messages);
    }
}
