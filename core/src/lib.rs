/// rolechat - realtime direct messaging for role- and domain-partitioned teams
///
/// Contact permissions, conversation loading, optimistic sends and edits, and
/// reconciliation against an asynchronous change feed.

pub mod backend;
pub mod config;
pub mod contact_resolver;
pub mod conversation;
pub mod conversation_store;
pub mod error;
pub mod identity;
pub mod memory_backend;
pub mod message;
pub mod message_list;
pub mod messenger_types;
pub mod mutation;
pub mod permissions;
pub mod pipeline;
pub mod realtime;
pub mod render;
pub mod session;
pub mod snapshot_store;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use identity::{Identity, Role};
pub use session::ChatSession;
