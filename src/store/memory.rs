//! In-process store with the behaviour of the hosted service
//!
//! Accounts, the current session and the tables all live behind one mutex.
//! Tokens are real HS256 JWTs so that claim decoding works the same as with
//! the hosted service. Failures and latency can be injected per collection.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{Collection, NewAuthUser, Query, RecordStore, SessionStore, SignUp};
use crate::auth::claims::{self, Claims};
use crate::auth::{AuthUser, Session, SessionEvent};
use crate::error::{Error, Result};
use crate::profile::Role;

const SECRET: &[u8] = b"pethome-memory-store";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const EVENT_CAPACITY: usize = 16;
const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    user: AuthUser,
    password: String,
    confirmed: bool,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    tables: HashMap<Collection, Vec<Value>>,
    next_id: HashMap<Collection, i64>,
    failing: HashMap<Collection, String>,
    delays: HashMap<Collection, Duration>,
    session_failure: Option<String>,
    sign_out_failure: Option<String>,
    confirm_email: bool,
}

impl State {
    fn rows(&self, collection: Collection) -> &[Value] {
        self.tables.get(&collection).map(Vec::as_slice).unwrap_or(&[])
    }

    fn check(&self, collection: Collection) -> Result<()> {
        match self.failing.get(&collection) {
            Some(message) => Err(Error::store(500, message)),
            None => Ok(()),
        }
    }

    fn find(&self, collection: Collection, id: &Value) -> Option<&Value> {
        self.rows(collection)
            .iter()
            .find(|row| row.get("id") == Some(id) || same_id(row.get("id"), id))
    }

    /// Check the foreign keys of `row` the way the database constraints would
    fn check_references(&self, collection: Collection, row: &Value) -> Result<()> {
        for target in Collection::ALL {
            let Some(column) = collection.foreign_key(target) else {
                continue;
            };
            match row.get(column) {
                None | Some(Value::Null) => {}
                Some(id) if self.find(target, id).is_some() => {}
                Some(_) => {
                    return Err(Error::store(
                        409,
                        format!(
                            "insert or update on table \"{collection}\" violates foreign key constraint \"{collection}_{column}_fkey\""
                        ),
                    ))
                }
            }
        }
        Ok(())
    }

    fn embed(&self, collection: Collection, row: &Value, query: &Query) -> Value {
        let projection = query.projection();
        let mut out = match row {
            Value::Object(fields) if projection.selects_all() => fields.clone(),
            Value::Object(fields) => fields
                .iter()
                .filter(|(key, _)| projection.columns.iter().any(|c| c == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => Map::new(),
        };

        for embed in &projection.embeds {
            let related = Collection::from_table(&embed.table)
                .and_then(|target| Some((target, collection.foreign_key(target)?)))
                .and_then(|(target, column)| self.find(target, row.get(column)?))
                .map(|found| pick(found, &embed.columns))
                .unwrap_or(Value::Null);
            out.insert(embed.table.clone(), related);
        }

        Value::Object(out)
    }
}

fn same_id(left: Option<&Value>, right: &Value) -> bool {
    match (left, right) {
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(Value::Number(a)), Value::String(b)) => a.to_string() == *b,
        (Some(Value::String(a)), Value::Number(b)) => *a == b.to_string(),
        _ => false,
    }
}

fn pick(row: &Value, columns: &[String]) -> Value {
    if columns.is_empty() || columns.iter().any(|c| c == "*") {
        return row.clone();
    }
    let fields = columns
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect();
    Value::Object(fields)
}

fn invalid_credentials() -> Error {
    Error::store(400, "Invalid login credentials")
}

/// Store keeping everything in process
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn issue(user: &AuthUser) -> Result<Session> {
        let claims = Claims {
            sub: user.id.clone(),
            exp: Some(Utc::now().timestamp() + TOKEN_LIFETIME_SECS),
            email: user.email.clone(),
            phone: user.phone.clone(),
            role: Some("authenticated".to_string()),
            user_metadata: user.user_metadata.clone(),
        };
        let access_token = claims::mint(&claims, SECRET)?;
        let refresh_token = Uuid::new_v4().simple().to_string();
        Ok(Session::new(access_token, refresh_token, user.clone(), TOKEN_LIFETIME_SECS))
    }

    fn create_account(
        state: &mut State,
        email: &str,
        password: &str,
        metadata: Value,
        confirmed: bool,
    ) -> Result<AuthUser> {
        let key = email.trim().to_lowercase();
        if state.accounts.contains_key(&key) {
            return Err(Error::store(422, "User already registered"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::store(422, "Password should be at least 6 characters"));
        }

        let user = AuthUser {
            id: Uuid::new_v4().to_string(),
            email: Some(key.clone()),
            phone: None,
            user_metadata: if metadata.is_null() { json!({}) } else { metadata },
            created_at: Some(Utc::now().to_rfc3339()),
        };
        state.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: password.to_string(),
                confirmed,
            },
        );
        Ok(user)
    }

    /// Register a confirmed identity without a `users` row
    pub fn add_account(&self, email: &str, password: &str, metadata: Value) -> Result<AuthUser> {
        Self::create_account(&mut self.state(), email, password, metadata, true)
    }

    /// Register a confirmed identity together with its `users` row
    pub fn seed_user(&self, email: &str, password: &str, name: &str, role: Role) -> Result<AuthUser> {
        let mut state = self.state();
        let user = Self::create_account(
            &mut state,
            email,
            password,
            json!({ "name": name }),
            true,
        )?;
        state.tables.entry(Collection::Users).or_default().push(json!({
            "id": user.id,
            "name": name,
            "email": user.email,
            "phone": null,
            "role_id": role.id(),
            "created_at": Utc::now().to_rfc3339(),
        }));
        Ok(user)
    }

    /// Sign-ups wait for an email confirmation and return no session
    pub fn require_email_confirmation(&self, required: bool) {
        self.state().confirm_email = required;
    }

    /// Put a session in place silently, as if it had been restored from disk
    pub fn restore_session(&self, email: &str) -> Result<Session> {
        let mut state = self.state();
        let user = state
            .accounts
            .get(&email.trim().to_lowercase())
            .map(|account| account.user.clone())
            .ok_or_else(|| Error::auth(format!("no account for {email}")))?;
        let session = Self::issue(&user)?;
        state.session = Some(session.clone());
        Ok(session)
    }

    /// Renew the access token of the current session
    pub fn refresh_session(&self) -> Result<Session> {
        let session = {
            let mut state = self.state();
            let user = state
                .session
                .as_ref()
                .map(|session| session.user.clone())
                .ok_or(Error::NotAuthenticated)?;
            let session = Self::issue(&user)?;
            state.session = Some(session.clone());
            session
        };
        self.publish(SessionEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    /// Drop the current session as if it had run out
    pub fn expire_session(&self) {
        self.state().session = None;
        self.publish(SessionEvent::Expired);
    }

    /// Make every call on `collection` fail with `message`
    pub fn fail_collection(&self, collection: Collection, message: &str) {
        self.state().failing.insert(collection, message.to_string());
    }

    /// Make `get_session` fail with `message`
    pub fn fail_session_lookup(&self, message: &str) {
        self.state().session_failure = Some(message.to_string());
    }

    /// Make `sign_out` report `message` (the session is still dropped)
    pub fn fail_sign_out(&self, message: &str) {
        self.state().sign_out_failure = Some(message.to_string());
    }

    /// Hold every call on `collection` for `delay` before answering
    pub fn delay_collection(&self, collection: Collection, delay: Duration) {
        self.state().delays.insert(collection, delay);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing.clear();
        state.delays.clear();
        state.session_failure = None;
        state.sign_out_failure = None;
    }

    /// Snapshot of a table
    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.state().rows(collection).to_vec()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state().session.clone()
    }

    async fn pause(&self, collection: Collection) {
        let delay = self.state().delays.get(&collection).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self) -> Result<Option<Session>> {
        {
            let mut state = self.state();
            if let Some(message) = &state.session_failure {
                return Err(Error::store(500, message));
            }
            if !state.session.as_ref().map_or(false, Session::is_expired) {
                return Ok(state.session.clone());
            }
            state.session = None;
        }
        self.publish(SessionEvent::Expired);
        Ok(None)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = {
            let mut state = self.state();
            let account = state
                .accounts
                .get(&email.trim().to_lowercase())
                .ok_or_else(invalid_credentials)?;
            if account.password != password {
                return Err(invalid_credentials());
            }
            if !account.confirmed {
                return Err(Error::store(400, "Email not confirmed"));
            }
            let session = Self::issue(&account.user)?;
            state.session = Some(session.clone());
            session
        };

        log::debug!("Memory store signed in {}", session.user_id());
        self.publish(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUp> {
        let (user, session) = {
            let mut state = self.state();
            let confirmed = !state.confirm_email;
            let user = Self::create_account(&mut state, email, password, metadata, confirmed)?;
            let session = if confirmed {
                let session = Self::issue(&user)?;
                state.session = Some(session.clone());
                Some(session)
            } else {
                None
            };
            (user, session)
        };

        if let Some(session) = &session {
            self.publish(SessionEvent::SignedIn(session.clone()));
        }
        Ok(SignUp { user, session })
    }

    async fn sign_out(&self) -> Result<()> {
        let failure = {
            let mut state = self.state();
            state.session = None;
            state.sign_out_failure.clone()
        };
        self.publish(SessionEvent::SignedOut);
        match failure {
            Some(message) => Err(Error::store(500, message)),
            None => Ok(()),
        }
    }

    async fn admin_create_user(&self, user: NewAuthUser) -> Result<AuthUser> {
        let mut state = self.state();
        Self::create_account(
            &mut state,
            &user.email,
            &user.password,
            user.user_metadata,
            user.email_confirm,
        )
        .map_err(|e| match e {
            Error::Store { status: 422, ref message } if message == "User already registered" => {
                Error::store(422, "A user with this email address has already been registered")
            }
            e => e,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Value>> {
        self.pause(collection).await;
        let state = self.state();
        state.check(collection)?;

        let mut rows: Vec<&Value> = state
            .rows(collection)
            .iter()
            .filter(|row| query.matches(row))
            .collect();

        rows.sort_by(|a, b| {
            query
                .ordering()
                .iter()
                .map(|order| {
                    let left = a.get(&order.column).unwrap_or(&Value::Null);
                    let right = b.get(&order.column).unwrap_or(&Value::Null);
                    let ordering = super::query::compare_values(left, right);
                    if order.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(limit) = query.row_limit() {
            rows.truncate(limit);
        }

        Ok(rows
            .into_iter()
            .map(|row| state.embed(collection, row, query))
            .collect())
    }

    async fn count(&self, collection: Collection, query: &Query) -> Result<u64> {
        self.pause(collection).await;
        let state = self.state();
        state.check(collection)?;
        Ok(state
            .rows(collection)
            .iter()
            .filter(|row| query.matches(row))
            .count() as u64)
    }

    async fn insert(&self, collection: Collection, rows: Value) -> Result<Vec<Value>> {
        self.pause(collection).await;
        let mut state = self.state();
        state.check(collection)?;

        let rows = match rows {
            Value::Array(rows) => rows,
            row => vec![row],
        };

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(mut fields) = row else {
                return Err(Error::store(400, "row must be a JSON object"));
            };

            if collection == Collection::Users {
                let id = fields.get("id").cloned().unwrap_or(Value::Null);
                if id.is_null() {
                    return Err(Error::store(
                        400,
                        "null value in column \"id\" of relation \"users\" violates not-null constraint",
                    ));
                }
                if state.find(collection, &id).is_some() {
                    return Err(Error::store(
                        409,
                        "duplicate key value violates unique constraint \"users_pkey\"",
                    ));
                }
            } else if !fields.contains_key("id") {
                let next = state.next_id.entry(collection).or_insert(0);
                *next += 1;
                fields.insert("id".to_string(), json!(*next));
            }
            fields
                .entry("created_at")
                .or_insert_with(|| json!(Utc::now().to_rfc3339()));

            let row = Value::Object(fields);
            state.check_references(collection, &row)?;
            stored.push(row);
        }

        state
            .tables
            .entry(collection)
            .or_default()
            .extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn update(&self, collection: Collection, patch: Value, query: &Query) -> Result<Vec<Value>> {
        self.pause(collection).await;
        let mut state = self.state();
        state.check(collection)?;

        let Value::Object(patch) = patch else {
            return Err(Error::store(400, "patch must be a JSON object"));
        };

        let mut updated = Vec::new();
        for index in 0..state.rows(collection).len() {
            let row = &state.rows(collection)[index];
            if !query.matches(row) {
                continue;
            }
            let mut next = row.clone();
            if let Value::Object(fields) = &mut next {
                for (key, value) in &patch {
                    fields.insert(key.clone(), value.clone());
                }
            }
            state.check_references(collection, &next)?;
            updated.push((index, next));
        }

        let table = state.tables.entry(collection).or_default();
        for (index, row) in &updated {
            table[*index] = row.clone();
        }
        Ok(updated.into_iter().map(|(_, row)| row).collect())
    }

    async fn delete(&self, collection: Collection, query: &Query) -> Result<()> {
        self.pause(collection).await;
        let mut state = self.state();
        state.check(collection)?;
        if let Some(table) = state.tables.get_mut(&collection) {
            table.retain(|row| !query.matches(row));
        }
        Ok(())
    }
}
