/// Configuration management
use crate::error::{ChatError, Result};
use crate::identity::{Identity, Role};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_TEMP_ID_PREFIX: &str = "opt";

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Data directory for the local snapshot cache (cache disabled when unset)
    pub data_dir: Option<PathBuf>,

    /// Prefix of optimistic placeholder ids
    pub temp_id_prefix: String,

    /// Buffer size of the session event channel
    pub event_capacity: usize,

    /// Offset from UTC, in minutes, used to bucket messages by day
    pub utc_offset_minutes: i32,

    /// Confirm placeholders by sender + body when the backend does not echo `client_ref`
    pub text_dedup_fallback: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            utc_offset_minutes: 0,
            text_dedup_fallback: true,
        }
    }
}

impl ChatConfig {
    /// Parse `<email> <role> [domain] [flags..]` into an identity and config
    pub fn from_args(args: &[String]) -> Result<(Identity, Self)> {
        if args.len() < 3 {
            return Err(ChatError::Config(format!(
                "Usage: {} <email> <role> [domain] [--data-dir <path>] [--utc-offset <minutes>] [--event-capacity <n>] [--no-text-dedup]",
                args.first().map(String::as_str).unwrap_or("rolechat")
            )));
        }

        let email = args[1].trim().to_string();
        if !email.contains('@') {
            return Err(ChatError::Config(format!("Invalid email: {}", email)));
        }
        let role: Role = args[2].parse()?;

        let mut domain: Option<String> = None;
        let mut config = ChatConfig::default();

        let mut i = 3;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--utc-offset" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--utc-offset requires a minutes argument".to_string())
                    })?;
                    config.utc_offset_minutes = parse_offset(v)?;
                    i += 2;
                }
                "--event-capacity" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--event-capacity requires a number".to_string())
                    })?;
                    config.event_capacity = v
                        .parse::<usize>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| {
                            ChatError::Config("--event-capacity must be a positive number".to_string())
                        })?;
                    i += 2;
                }
                "--no-text-dedup" => {
                    config.text_dedup_fallback = false;
                    i += 1;
                }
                other if other.starts_with("--") => {
                    return Err(ChatError::Config(format!("Unknown flag: {}", other)));
                }
                other => {
                    domain = Some(other.to_string());
                    i += 1;
                }
            }
        }

        // Env overrides
        if let Ok(dir) = std::env::var("ROLECHAT_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(m) = std::env::var("ROLECHAT_UTC_OFFSET")
            .ok()
            .and_then(|s| parse_offset(&s).ok())
        {
            config.utc_offset_minutes = m;
        }
        if std::env::var("ROLECHAT_NO_TEXT_DEDUP").is_ok() {
            config.text_dedup_fallback = false;
        }

        let identity = Identity::new(email.clone(), email, role, domain);
        Ok((identity, config))
    }
}

fn parse_offset(v: &str) -> Result<i32> {
    v.parse::<i32>()
        .ok()
        .filter(|m| m.abs() < 24 * 60)
        .ok_or_else(|| ChatError::Config("--utc-offset must be minutes within ±1439".to_string()))
}
