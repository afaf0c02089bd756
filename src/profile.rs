//! User profiles and roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::auth::{AuthUser, Claims};
use crate::models::UserRecord;

/// Name used when nothing better is known
pub const PLACEHOLDER_NAME: &str = "Usuario";
/// Email used when nothing better is known
pub const PLACEHOLDER_EMAIL: &str = "usuario@example.com";

/// Dashboard role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Client,
}

impl Role {
    /// `role_id` value stored in the `users` table
    pub fn id(self) -> i64 {
        match self {
            Role::Admin => 1,
            Role::Client => 2,
        }
    }

    /// Map a `role_id`; unknown ids are clients.
    pub fn from_id(id: Option<i64>) -> Self {
        match id {
            Some(1) => Role::Admin,
            _ => Role::Client,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "client" => Ok(Role::Client),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Identity plus role and contact fields, as the dashboards see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
}

fn email_local_part(email: &str) -> Option<String> {
    email
        .split('@')
        .next()
        .filter(|local| !local.is_empty())
        .map(str::to_string)
}

impl UserProfile {
    /// Minimal client profile built from the identity record alone.
    pub fn from_identity(user: &AuthUser) -> Self {
        let email = user.email.clone().filter(|e| !e.is_empty());
        let name = user
            .metadata_str("name")
            .map(str::to_string)
            .or_else(|| email.as_deref().and_then(email_local_part))
            .unwrap_or_else(|| PLACEHOLDER_NAME.to_string());
        let phone = user
            .metadata_str("phone")
            .map(str::to_string)
            .or_else(|| user.phone.clone())
            .unwrap_or_default();

        Self {
            id: user.id.clone(),
            name,
            email: email.unwrap_or_else(|| PLACEHOLDER_EMAIL.to_string()),
            phone,
            role: Role::Client,
        }
    }

    /// Minimal client profile built from access token claims.
    pub fn from_claims(claims: &Claims) -> Self {
        let user = AuthUser {
            id: claims.sub.clone(),
            email: claims.email.clone(),
            phone: claims.phone.clone(),
            user_metadata: claims.user_metadata.clone(),
            created_at: None,
        };
        Self::from_identity(&user)
    }

    /// Full profile from a `users` row.
    pub fn from_record(record: &UserRecord) -> Self {
        let name = record
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| record.email.as_deref().and_then(email_local_part))
            .unwrap_or_else(|| PLACEHOLDER_NAME.to_string());

        Self {
            id: record.id.clone(),
            name,
            email: record
                .email
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_EMAIL.to_string()),
            phone: record.phone.clone().unwrap_or_default(),
            role: Role::from_id(record.role_id),
        }
    }

    /// Placeholder profile for a user we know nothing about.
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: PLACEHOLDER_NAME.to_string(),
            email: PLACEHOLDER_EMAIL.to_string(),
            phone: String::new(),
            role: Role::Client,
        }
    }
}

/// Why a profile is a fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// Published from identity claims while the full profile loads
    Pending,
    /// The `users` table has no row for this identity
    Missing,
    /// Loading the `users` row failed
    Failed(String),
}

/// A profile together with how it was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    Resolved(UserProfile),
    Fallback {
        profile: UserProfile,
        reason: FallbackReason,
    },
}

impl Profile {
    pub fn fallback(profile: UserProfile, reason: FallbackReason) -> Self {
        Profile::Fallback { profile, reason }
    }

    pub fn user(&self) -> &UserProfile {
        match self {
            Profile::Resolved(profile) | Profile::Fallback { profile, .. } => profile,
        }
    }

    pub fn role(&self) -> Role {
        self.user().role
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Profile::Resolved(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Profile::Fallback {
                reason: FallbackReason::Pending,
                ..
            }
        )
    }
}
