//! The hosted service seen from the client: auth plus table access
//!
//! [`SessionStore`] covers identity and sessions, [`RecordStore`] covers the
//! tables. [`HttpStore`] talks to a Supabase project; [`MemoryStore`] keeps
//! everything in process and is what the tests and the demo use.

mod http;
mod memory;
mod query;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;

use crate::auth::{AuthUser, Session, SessionEvent};
use crate::error::{Error, Result};

pub use http::HttpStore;
pub use memory::MemoryStore;
pub use query::*;

/// Tables the application reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Pets,
    Appointments,
    Services,
    Exams,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Pets,
        Collection::Appointments,
        Collection::Services,
        Collection::Exams,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Pets => "pets",
            Collection::Appointments => "appointments",
            Collection::Services => "services",
            Collection::Exams => "exams",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.table() == table)
    }

    /// Column of `self` referencing `target`, used to embed related rows.
    pub fn foreign_key(self, target: Collection) -> Option<&'static str> {
        match (self, target) {
            (Collection::Pets, Collection::Users) => Some("owner_id"),
            (Collection::Appointments, Collection::Users) => Some("owner_id"),
            (Collection::Appointments, Collection::Pets) => Some("pet_id"),
            (Collection::Appointments, Collection::Services) => Some("service_id"),
            (Collection::Exams, Collection::Pets) => Some("pet_id"),
            (Collection::Exams, Collection::Appointments) => Some("appointment_id"),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Result of a sign-up: the identity always, a session when the service
/// signs the user in right away (no email confirmation pending).
#[derive(Debug, Clone, PartialEq)]
pub struct SignUp {
    pub user: AuthUser,
    pub session: Option<Session>,
}

/// Identity created by an administrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAuthUser {
    pub email: String,
    pub password: String,
    pub email_confirm: bool,
    pub user_metadata: Value,
}

/// Authentication half of the hosted service
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The current session, refreshed or dropped if it ran out
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Sign in with email and password; publishes `SignedIn`
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    /// Create an identity; publishes `SignedIn` when a session comes back
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<SignUp>;

    /// End the session; publishes `SignedOut` even when the remote call fails
    async fn sign_out(&self) -> Result<()>;

    /// Create a confirmed identity with administrator rights
    async fn admin_create_user(&self, user: NewAuthUser) -> Result<AuthUser>;

    /// Session change notifications, from now on
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Table half of the hosted service. Rows travel as JSON objects.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Value>>;

    /// Number of rows matching the query's filters
    async fn count(&self, collection: Collection, query: &Query) -> Result<u64>;

    /// Insert one row or an array of rows; returns the stored rows
    async fn insert(&self, collection: Collection, rows: Value) -> Result<Vec<Value>>;

    /// Patch the rows matching the query; returns them after the change
    async fn update(&self, collection: Collection, patch: Value, query: &Query) -> Result<Vec<Value>>;

    async fn delete(&self, collection: Collection, query: &Query) -> Result<()>;
}

/// Everything the application needs from the hosted service
pub trait Backend: SessionStore + RecordStore {}

impl<T: SessionStore + RecordStore> Backend for T {}

/// Typed helpers over [`RecordStore`]
#[async_trait]
pub trait RecordStoreExt: RecordStore {
    async fn select_as<T>(&self, collection: Collection, query: &Query) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let rows = self.select(collection, query).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }

    async fn select_one<T>(&self, collection: Collection, query: &Query) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let query = query.clone().limit(1);
        let mut rows = self.select_as::<T>(collection, &query).await?;
        Ok(rows.pop())
    }

    async fn insert_as<N, T>(&self, collection: Collection, row: &N) -> Result<T>
    where
        N: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send,
    {
        let rows = self.insert(collection, serde_json::to_value(row)?).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::database(format!("insert into {collection} returned no rows")))?;
        Ok(serde_json::from_value(row)?)
    }

    async fn update_as<P, T>(&self, collection: Collection, patch: &P, query: &Query) -> Result<Vec<T>>
    where
        P: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send,
    {
        let rows = self
            .update(collection, serde_json::to_value(patch)?, query)
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(Error::from))
            .collect()
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}
