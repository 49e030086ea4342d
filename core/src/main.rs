/// rolechat demo - drives a session against the in-memory backend
use rolechat_core::contact_resolver::{group_by_role, Contact};
use rolechat_core::memory_backend::InMemoryBackend;
use rolechat_core::message::{NewMessage, SendExtra};
use rolechat_core::{ChatConfig, ChatSession, Identity, Role};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn person(name: &str, email: &str, role: Role, domain: Option<&str>) -> Contact {
    Contact {
        id: email.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        role,
        domain: domain.map(str::to_string),
    }
}

/// Seed a small organization around the caller
async fn seed(backend: &InMemoryBackend, me: &Identity) {
    let domain = me.domain.as_deref().unwrap_or("HR");
    let people = [
        person("Sam Root", "root@org.example", Role::SuperAdmin, None),
        person("Ada Admin", "ada@org.example", Role::Admin, Some(domain)),
        person("Ivan Ops", "ivan@org.example", Role::Admin, Some("IT")),
        person("Wen Worker", "wen@org.example", Role::Worker, Some(domain)),
        person("Tom Tech", "tom@org.example", Role::Worker, Some("IT")),
    ];
    for p in people {
        if p.email != me.email {
            backend.add_contact(p).await;
        }
    }
    backend
        .add_contact(Contact {
            id: me.id.clone(),
            name: String::new(),
            email: me.email.clone(),
            role: me.role,
            domain: me.domain.clone(),
        })
        .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let (identity, config) =
        ChatConfig::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let backend = InMemoryBackend::new();
    seed(&backend, &identity).await;
    let shared = Arc::new(backend.clone());

    let session = ChatSession::new(identity, shared.clone(), shared, config)
        .map_err(|e| anyhow::anyhow!("Session error: {}", e))?;

    let contacts = session.refresh_contacts().await;
    for group in group_by_role(&contacts) {
        info!("{}s:", group.label);
        for c in group.members {
            info!("   {} <{}> [{}]", c.display_name(), c.email, c.badge());
        }
    }

    let Some(first) = contacts.first().cloned() else {
        info!("No one to talk to");
        return Ok(());
    };

    session
        .select_contact(Some(first.clone()))
        .await
        .map_err(|e| anyhow::anyhow!("Select error: {}", e))?;

    let me = session.identity().clone();
    backend
        .inject(NewMessage::new(
            &first.email,
            &me.email,
            first.role,
            "Morning! Did the report go out?",
            &SendExtra::default(),
        ))
        .await;
    // Give the realtime pump a moment to deliver the insert
    tokio::time::sleep(Duration::from_millis(50)).await;

    if let Some(incoming) = session.messages().await.last().cloned() {
        session
            .reply(&incoming.id, "Yes, sent it an hour ago.")
            .await
            .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
    }

    let view = session.render().await;
    println!("{}", serde_json::to_string_pretty(&view)?);

    session.close().await;
    Ok(())
}
