/// Contact resolution tests
/// Permission matrix behaviour against the in-memory directory

extern crate rolechat_core;

use rolechat_core::contact_resolver::{Contact, ContactResolver};
use rolechat_core::memory_backend::InMemoryBackend;
use rolechat_core::{Identity, Role};
use std::sync::Arc;

fn person(email: &str, role: Role, domain: Option<&str>) -> Contact {
    Contact {
        id: email.to_string(),
        name: email.split('@').next().unwrap_or_default().to_string(),
        email: email.to_string(),
        role,
        domain: domain.map(str::to_string),
    }
}

/// Two domains, rows deliberately interleaved across domains
async fn directory() -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    for c in [
        person("root@org.io", Role::SuperAdmin, None),
        person("root2@org.io", Role::SuperAdmin, None),
        person("it-admin@org.io", Role::Admin, Some("IT")),
        person("hr-admin@org.io", Role::Admin, Some("HR")),
        person("hr-admin2@org.io", Role::Admin, Some("HR")),
        person("it-worker@org.io", Role::Worker, Some("IT")),
        person("hr-worker@org.io", Role::Worker, Some("HR")),
        person("hr-worker2@org.io", Role::Worker, Some("HR")),
    ] {
        backend.add_contact(c).await;
    }
    backend
}

fn emails(contacts: &[Contact]) -> Vec<&str> {
    contacts.iter().map(|c| c.email.as_str()).collect()
}

#[tokio::test]
async fn test_worker_sees_same_domain_admins_and_workers() {
    let backend = Arc::new(directory().await);
    let resolver = ContactResolver::new(backend);
    let me = Identity::new("w", "hr-worker@org.io", Role::Worker, Some("HR".to_string()));

    let contacts = resolver.resolve(&me).await;

    assert_eq!(
        emails(&contacts),
        vec!["hr-admin@org.io", "hr-admin2@org.io", "hr-worker2@org.io"]
    );
    assert!(contacts.iter().all(|c| c.domain.as_deref() == Some("HR")));
}

#[tokio::test]
async fn test_admin_sees_super_admins_all_admins_and_domain_workers() {
    let backend = Arc::new(directory().await);
    let resolver = ContactResolver::new(backend);
    let me = Identity::new("a", "hr-admin@org.io", Role::Admin, Some("HR".to_string()));

    let contacts = resolver.resolve(&me).await;

    assert_eq!(
        emails(&contacts),
        vec![
            "root@org.io",
            "root2@org.io",
            "it-admin@org.io",
            "hr-admin2@org.io",
            "hr-worker@org.io",
            "hr-worker2@org.io",
        ]
    );
}

#[tokio::test]
async fn test_super_admin_sees_every_admin_only() {
    let backend = Arc::new(directory().await);
    let resolver = ContactResolver::new(backend);
    let me = Identity::new("s", "root@org.io", Role::SuperAdmin, None);

    let contacts = resolver.resolve(&me).await;

    assert_eq!(contacts.len(), 3);
    assert!(contacts.iter().all(|c| c.role == Role::Admin));
}

#[tokio::test]
async fn test_worker_without_domain_has_no_contacts() {
    let backend = Arc::new(directory().await);
    let resolver = ContactResolver::new(backend);
    let me = Identity::new("w", "floater@org.io", Role::Worker, None);

    assert!(resolver.resolve(&me).await.is_empty());
}

#[tokio::test]
async fn test_failing_table_contributes_nothing() {
    let backend = directory().await;
    backend.fail_table(Role::SuperAdmin, true).await;
    let resolver = ContactResolver::new(Arc::new(backend.clone()));
    let me = Identity::new("a", "hr-admin@org.io", Role::Admin, Some("HR".to_string()));

    let contacts = resolver.resolve(&me).await;

    // Admins and workers still resolve
    assert_eq!(contacts.len(), 4);
    assert!(contacts.iter().all(|c| c.role != Role::SuperAdmin));
}

#[tokio::test]
async fn test_duplicate_rows_are_collapsed() {
    let backend = directory().await;
    backend
        .add_contact(person("hr-admin2@org.io", Role::Admin, Some("HR")))
        .await;
    let resolver = ContactResolver::new(Arc::new(backend));
    let me = Identity::new("w", "hr-worker@org.io", Role::Worker, Some("HR".to_string()));

    let contacts = resolver.resolve(&me).await;
    let admins = contacts.iter().filter(|c| c.email == "hr-admin2@org.io").count();
    assert_eq!(admins, 1);
}

#[tokio::test]
async fn test_fetch_self_degrades_to_none() {
    let backend = directory().await;
    let resolver = ContactResolver::new(Arc::new(backend.clone()));
    let me = Identity::new("a", "hr-admin@org.io", Role::Admin, Some("HR".to_string()));

    let found = resolver.fetch_self(&me).await;
    assert_eq!(found.map(|c| c.email), Some("hr-admin@org.io".to_string()));

    backend.fail_table(Role::Admin, true).await;
    assert!(resolver.fetch_self(&me).await.is_none());
}
