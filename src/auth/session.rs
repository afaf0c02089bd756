//! Session data and session change notifications

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identity record kept by the auth service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    /// The user ID
    pub id: String,

    /// The user's email address
    #[serde(default)]
    pub email: Option<String>,

    /// The user's phone number
    #[serde(default)]
    pub phone: Option<String>,

    /// Metadata supplied at sign-up (name, phone)
    #[serde(default)]
    pub user_metadata: Value,

    /// The creation time
    #[serde(default)]
    pub created_at: Option<String>,
}

impl AuthUser {
    /// Read a string field from the user metadata
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

/// Session data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    pub access_token: String,

    /// The refresh token
    #[serde(default)]
    pub refresh_token: String,

    /// The token type
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// The expiry time in seconds
    #[serde(default)]
    pub expires_in: i64,

    /// The expiry timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The signed-in identity
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

impl Session {
    /// Create a new session
    pub fn new(access_token: String, refresh_token: String, user: AuthUser, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: default_token_type(),
            expires_in,
            expires_at: Some(unix_now().saturating_add(expires_in)),
            user,
        }
    }

    /// Fill in `expires_at` when the service only sent `expires_in`
    pub fn stamped(mut self) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            self.expires_at = Some(unix_now().saturating_add(self.expires_in));
        }
        self
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => unix_now() >= expires_at,
            None => false,
        }
    }

    /// The user ID
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Notification published by a store whenever the session changes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A user signed in (or signed up with an immediate session)
    SignedIn(Session),
    /// The access token was renewed for the same user
    TokenRefreshed(Session),
    /// The session was terminated on request
    SignedOut,
    /// The session ran out and could not be renewed
    Expired,
}

impl SessionEvent {
    /// The session carried by the event, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => Some(session),
            SessionEvent::SignedOut | SessionEvent::Expired => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> AuthUser {
        AuthUser {
            id: "user-1".to_string(),
            email: Some("ana@example.com".to_string()),
            phone: None,
            user_metadata: json!({ "name": "Ana", "phone": "" }),
            created_at: None,
        }
    }

    #[test]
    fn new_session_expires_in_the_future() {
        let session = Session::new("at".into(), "rt".into(), user(), 3600);
        assert!(!session.is_expired());
        assert_eq!(session.user_id(), "user-1");
    }

    #[test]
    fn past_expiry_is_expired() {
        let mut session = Session::new("at".into(), "rt".into(), user(), 3600);
        session.expires_at = Some(unix_now() - 1);
        assert!(session.is_expired());
    }

    #[test]
    fn deserializes_gotrue_reply() {
        let session: Session = serde_json::from_value(json!({
            "access_token": "at",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "rt",
            "user": { "id": "user-1", "email": "ana@example.com" }
        }))
        .unwrap();
        let session = session.stamped();
        assert!(session.expires_at.is_some());
        assert_eq!(session.user.email.as_deref(), Some("ana@example.com"));
        assert!(session.user.user_metadata.is_null());
    }

    #[test]
    fn huge_expires_in_saturates() {
        let session = Session::new("at".into(), "rt".into(), user(), i64::MAX);
        assert_eq!(session.expires_at, Some(i64::MAX));
        assert!(!session.is_expired());

        let mut reply = Session::new("at".into(), "rt".into(), user(), 0);
        reply.expires_at = None;
        reply.expires_in = i64::MAX;
        assert_eq!(reply.stamped().expires_at, Some(i64::MAX));
    }

    #[test]
    fn blank_metadata_is_ignored() {
        let user = user();
        assert_eq!(user.metadata_str("name"), Some("Ana"));
        assert_eq!(user.metadata_str("phone"), None);
        assert_eq!(user.metadata_str("missing"), None);
    }
}
