//! Store backed by a Supabase project (GoTrue + PostgREST)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::{Collection, NewAuthUser, Query, RecordStore, SessionStore, SignUp};
use crate::auth::{AuthUser, Session, SessionEvent, SessionFile};
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::fetch::Fetch;

const EVENT_CAPACITY: usize = 16;

/// Sign-up reply: a full session when the user is signed in at once,
/// the bare identity when an email confirmation is pending.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpReply {
    Session(Session),
    User(AuthUser),
}

/// Client for a hosted Supabase project
pub struct HttpStore {
    options: ClientOptions,
    client: Client,
    session: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<SessionEvent>,
    persisted: Option<SessionFile>,
}

impl HttpStore {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let persisted = match (&options.session_file, options.persist_session) {
            (Some(path), true) => Some(SessionFile::new(path.clone())),
            _ => None,
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            options,
            client,
            session: Arc::new(RwLock::new(None)),
            events,
            persisted,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.options.base_url(), path)
    }

    fn rest_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.options.base_url(), collection.table())
    }

    fn cached(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store_session(&self, session: Option<Session>) {
        if let Some(file) = &self.persisted {
            let written = match &session {
                Some(session) => file.save(session),
                None => file.clear(),
            };
            if let Err(e) = written {
                log::warn!("Could not update {}: {}", file.path().display(), e);
            }
        }
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session;
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Token for table requests: the user's when signed in, else the anon key
    fn bearer(&self) -> String {
        self.cached()
            .map(|session| session.access_token)
            .unwrap_or_else(|| self.options.anon_key.clone())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let url = self.auth_url("/token?grant_type=refresh_token");
        let session = Fetch::post(&self.client, &url)
            .api_key(&self.options.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))?
            .execute::<Session>()
            .await?;
        Ok(session.stamped())
    }
}

#[async_trait]
impl SessionStore for HttpStore {
    async fn get_session(&self) -> Result<Option<Session>> {
        let mut session = self.cached();
        if session.is_none() {
            if let Some(file) = &self.persisted {
                session = file.load()?;
                if let Some(restored) = &session {
                    log::debug!("Restored session for user {}", restored.user_id());
                    *self
                        .session
                        .write()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(restored.clone());
                }
            }
        }

        let Some(session) = session else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        if self.options.auto_refresh_token && !session.refresh_token.is_empty() {
            match self.refresh(&session.refresh_token).await {
                Ok(fresh) => {
                    log::info!("Refreshed expired session for user {}", fresh.user_id());
                    self.store_session(Some(fresh.clone()));
                    self.publish(SessionEvent::TokenRefreshed(fresh.clone()));
                    return Ok(Some(fresh));
                }
                Err(e) => log::warn!("Session refresh failed: {}", e),
            }
        }

        self.store_session(None);
        self.publish(SessionEvent::Expired);
        Ok(None)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let url = self.auth_url("/token?grant_type=password");
        let session = Fetch::post(&self.client, &url)
            .api_key(&self.options.anon_key)
            .json(&json!({ "email": email, "password": password }))?
            .execute::<Session>()
            .await?
            .stamped();

        log::info!("Signed in user {}", session.user_id());
        self.store_session(Some(session.clone()));
        self.publish(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUp> {
        let url = self.auth_url("/signup");
        let reply = Fetch::post(&self.client, &url)
            .api_key(&self.options.anon_key)
            .json(&json!({ "email": email, "password": password, "data": metadata }))?
            .execute::<SignUpReply>()
            .await?;

        match reply {
            SignUpReply::Session(session) => {
                let session = session.stamped();
                self.store_session(Some(session.clone()));
                self.publish(SessionEvent::SignedIn(session.clone()));
                Ok(SignUp {
                    user: session.user.clone(),
                    session: Some(session),
                })
            }
            SignUpReply::User(user) => {
                log::info!("Signed up user {}, confirmation pending", user.id);
                Ok(SignUp {
                    user,
                    session: None,
                })
            }
        }
    }

    async fn sign_out(&self) -> Result<()> {
        let result = match self.cached() {
            Some(session) => {
                let url = self.auth_url("/logout");
                Fetch::post(&self.client, &url)
                    .api_key(&self.options.anon_key)
                    .bearer_auth(&session.access_token)
                    .execute_empty()
                    .await
            }
            None => Ok(()),
        };

        // The local session goes away whatever the service said
        self.store_session(None);
        self.publish(SessionEvent::SignedOut);
        result
    }

    async fn admin_create_user(&self, user: NewAuthUser) -> Result<AuthUser> {
        let service_key = self.options.service_role_key.as_deref().ok_or_else(|| {
            Error::auth("creating users needs the service role key (SUPABASE_SERVICE_ROLE_KEY)")
        })?;

        let url = self.auth_url("/admin/users");
        Fetch::post(&self.client, &url)
            .api_key(service_key)
            .bearer_auth(service_key)
            .json(&user)?
            .execute::<AuthUser>()
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Total from a `Content-Range: 0-9/42` (or `*/0`) header
fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        row => vec![row],
    }
}

#[async_trait]
impl RecordStore for HttpStore {
    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Value>> {
        let value = Fetch::get(&self.client, &self.rest_url(collection))
            .api_key(&self.options.anon_key)
            .bearer_auth(&self.bearer())
            .query(query.to_params())
            .execute::<Value>()
            .await?;
        Ok(rows(value))
    }

    async fn count(&self, collection: Collection, query: &Query) -> Result<u64> {
        let response = Fetch::head(&self.client, &self.rest_url(collection))
            .api_key(&self.options.anon_key)
            .bearer_auth(&self.bearer())
            .header("prefer", "count=exact")
            .query(query.to_params())
            .send()
            .await?;

        response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| Error::database(format!("no row count returned for {collection}")))
    }

    async fn insert(&self, collection: Collection, rows_in: Value) -> Result<Vec<Value>> {
        let value = Fetch::post(&self.client, &self.rest_url(collection))
            .api_key(&self.options.anon_key)
            .bearer_auth(&self.bearer())
            .header("prefer", "return=representation")
            .json(&rows_in)?
            .execute::<Value>()
            .await?;
        Ok(rows(value))
    }

    async fn update(&self, collection: Collection, patch: Value, query: &Query) -> Result<Vec<Value>> {
        let value = Fetch::patch(&self.client, &self.rest_url(collection))
            .api_key(&self.options.anon_key)
            .bearer_auth(&self.bearer())
            .header("prefer", "return=representation")
            .query(query.filter_params())
            .json(&patch)?
            .execute::<Value>()
            .await?;
        Ok(rows(value))
    }

    async fn delete(&self, collection: Collection, query: &Query) -> Result<()> {
        Fetch::delete(&self.client, &self.rest_url(collection))
            .api_key(&self.options.anon_key)
            .bearer_auth(&self.bearer())
            .header("prefer", "return=minimal")
            .query(query.filter_params())
            .execute_empty()
            .await
    }
}
