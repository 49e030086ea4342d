/// Contact resolution: who the caller may message
use crate::backend::Directory;
use crate::identity::{Identity, Role};
use crate::permissions::contact_rules;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A directory entry. Email is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub domain: Option<String>,
}

impl Contact {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }

    /// Badge text, e.g. "Admin · HR"
    pub fn badge(&self) -> String {
        match &self.domain {
            Some(d) => format!("{} · {}", self.role.label(), d),
            None => self.role.label().to_string(),
        }
    }
}

/// Reads the directory through the permission matrix
pub struct ContactResolver {
    directory: Arc<dyn Directory>,
}

impl ContactResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Allowed contacts for `identity`, in matrix order, deduplicated by email.
    /// A failing sub-query contributes nothing; this never fails.
    pub async fn resolve(&self, identity: &Identity) -> Vec<Contact> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();

        for rule in contact_rules(identity.role) {
            let Some(filter) = rule.directory_query(identity) else {
                debug!(
                    "Skipping {} lookup for {}: no domain",
                    rule.counterpart, identity.email
                );
                continue;
            };

            let rows = match self.directory.query_table(rule.counterpart, filter).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Directory read for {} table failed: {}", rule.counterpart, e);
                    continue;
                }
            };

            for mut contact in rows {
                contact.role = rule.counterpart;
                if rule.admits(identity, &contact) && seen.insert(contact.email.clone()) {
                    out.push(contact);
                }
            }
        }

        debug!("Resolved {} contacts for {}", out.len(), identity.email);
        out
    }

    /// The caller's own directory row, `None` on failure or absence
    pub async fn fetch_self(&self, identity: &Identity) -> Option<Contact> {
        match self.directory.get_self(&identity.email, identity.role).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Self lookup for {} failed: {}", identity.email, e);
                None
            }
        }
    }
}

/// Case-insensitive substring match on name, email and domain
pub fn filter_contacts<'a>(contacts: &'a [Contact], query: &str) -> Vec<&'a Contact> {
    let q = query.trim().to_lowercase();
    contacts
        .iter()
        .filter(|c| {
            q.is_empty()
                || c.name.to_lowercase().contains(&q)
                || c.email.to_lowercase().contains(&q)
                || c.domain.as_deref().unwrap_or("").to_lowercase().contains(&q)
        })
        .collect()
}

/// Contacts grouped under their role, groups in first-seen order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactGroup<'a> {
    pub role: Role,
    pub label: &'static str,
    pub members: Vec<&'a Contact>,
}

pub fn group_by_role<'a, I>(contacts: I) -> Vec<ContactGroup<'a>>
where
    I: IntoIterator<Item = &'a Contact>,
{
    let mut groups: Vec<ContactGroup<'a>> = Vec::new();
    for c in contacts {
        match groups.iter_mut().find(|g| g.role == c.role) {
            Some(g) => g.members.push(c),
            None => groups.push(ContactGroup {
                role: c.role,
                label: c.role.label(),
                members: vec![c],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(name: &str, email: &str, role: Role, domain: Option<&str>) -> Contact {
        Contact {
            id: email.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            domain: domain.map(str::to_string),
        }
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        assert_eq!(c("", "x@org.io", Role::Admin, None).display_name(), "x@org.io");
        assert_eq!(c("Xan", "x@org.io", Role::Admin, None).display_name(), "Xan");
    }

    #[test]
    fn test_filter_matches_domain_case_insensitively() {
        let list = vec![
            c("Ana", "ana@org.io", Role::Admin, Some("HR")),
            c("Bo", "bo@org.io", Role::Worker, Some("IT")),
        ];
        let hits = filter_contacts(&list, "hr");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].email, "ana@org.io");
        assert_eq!(filter_contacts(&list, "  ").len(), 2);
    }

    #[test]
    fn test_group_by_role_keeps_order() {
        let list = vec![
            c("S", "s@org.io", Role::SuperAdmin, None),
            c("A", "a@org.io", Role::Admin, Some("HR")),
            c("A2", "a2@org.io", Role::Admin, Some("IT")),
            c("W", "w@org.io", Role::Worker, Some("HR")),
        ];
        let groups = group_by_role(&list);
        let labels: Vec<_> = groups.iter().map(|g| g.label).collect();
        assert_eq!(labels, vec!["Super Admin", "Admin", "Worker"]);
        assert_eq!(groups[1].members.len(), 2);
    }
}
