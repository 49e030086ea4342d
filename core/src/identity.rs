/// Caller identity and organizational roles
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Organizational role. Each role owns exactly one directory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[serde(alias = "superadmin")]
    SuperAdmin,
    Admin,
    Worker,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::SuperAdmin, Role::Admin, Role::Worker];

    /// Wire name, also the name of the role's directory table
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Worker => "worker",
        }
    }

    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }

    /// Human-readable label for list headers and badges
    pub fn label(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "Super Admin",
            Role::Admin => "Admin",
            Role::Worker => "Worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "super_admin" | "superadmin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "worker" => Ok(Role::Worker),
            other => Err(ChatError::Config(format!("Unknown role: {}", other))),
        }
    }
}

/// Authenticated caller, handed in by the auth provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub role: Role,
    /// Organizational partition; super admins usually have none
    pub domain: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role, domain: Option<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
            domain: domain.filter(|d| !d.trim().is_empty()),
        }
    }

    pub fn is_self(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email)
    }
}
