//! Configuration for the PetHome client

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Environment variable holding the service URL
pub const URL_VAR: &str = "SUPABASE_URL";
/// Environment variable holding the public (anon) key
pub const ANON_KEY_VAR: &str = "SUPABASE_ANON_KEY";
/// Environment variable holding the optional service role key
pub const SERVICE_ROLE_KEY_VAR: &str = "SUPABASE_SERVICE_ROLE_KEY";
/// Environment variable pointing at the persisted session file
pub const SESSION_FILE_VAR: &str = "PETHOME_SESSION_FILE";
/// Environment variable overriding the request timeout, in seconds
pub const REQUEST_TIMEOUT_VAR: &str = "PETHOME_REQUEST_TIMEOUT_SECS";

/// Connection settings for the hosted service.
///
/// The URL and the anon key are mandatory; everything else has a default.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL of the Supabase project
    pub url: Url,

    /// Public API key
    pub anon_key: String,

    /// Service role key, needed only by admin user creation
    pub service_role_key: Option<String>,

    /// Whether the session is written to `session_file`
    pub persist_session: bool,

    /// Where a persisted session lives
    pub session_file: Option<PathBuf>,

    /// Whether an expired session is refreshed on lookup
    pub auto_refresh_token: bool,

    /// The request timeout
    pub request_timeout: Option<Duration>,
}

impl ClientOptions {
    /// Create options from the two required credentials, validating both.
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        let url = Url::parse(url.trim())?;
        if anon_key.trim().is_empty() {
            return Err(Error::config(format!("{ANON_KEY_VAR} cannot be empty")));
        }

        Ok(Self {
            url,
            anon_key: anon_key.trim().to_string(),
            service_role_key: None,
            persist_session: false,
            session_file: None,
            auto_refresh_token: true,
            request_timeout: Some(Duration::from_secs(30)),
        })
    }

    /// Load options from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load options through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::config(format!("{name} environment variable not found")))
        };

        let mut options = Self::new(&required(URL_VAR)?, &required(ANON_KEY_VAR)?)?;

        if let Some(key) = lookup(SERVICE_ROLE_KEY_VAR).filter(|k| !k.trim().is_empty()) {
            options.service_role_key = Some(key.trim().to_string());
        }

        if let Some(path) = lookup(SESSION_FILE_VAR).filter(|p| !p.trim().is_empty()) {
            options = options.with_session_file(PathBuf::from(path.trim()));
        }

        if let Some(secs) = lookup(REQUEST_TIMEOUT_VAR) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::config(format!("{REQUEST_TIMEOUT_VAR} must be a number of seconds"))
            })?;
            options.request_timeout = Some(Duration::from_secs(secs));
        }

        Ok(options)
    }

    /// Set the service role key
    pub fn with_service_role_key(mut self, value: &str) -> Self {
        self.service_role_key = Some(value.to_string());
        self
    }

    /// Persist the session to the given file
    pub fn with_session_file(mut self, path: PathBuf) -> Self {
        self.persist_session = true;
        self.session_file = Some(path);
        self
    }

    /// Set whether to automatically refresh the token
    pub fn with_auto_refresh_token(mut self, value: bool) -> Self {
        self.auto_refresh_token = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Base URL without a trailing slash, ready for path concatenation
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}
