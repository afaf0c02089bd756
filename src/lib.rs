//! PetHome client core
//!
//! The application core of the PetHome home veterinary service: the
//! authentication state machine, route guarding and the client and admin
//! dashboard operations, on top of a Supabase project (GoTrue auth and
//! PostgREST tables).
//!
//! # Example
//!
//! ```no_run
//! use pethome::prelude::*;
//!
//! # async fn run() -> pethome::error::Result<()> {
//! let app = PetHome::connect(ClientOptions::from_env()?)?;
//! app.auth().initialize().await;
//!
//! if app.auth().login("ana@example.com", "Secreta123").await.is_ok() {
//!     app.auth().settled().await;
//!     let navigation = app.navigate("/dashboard");
//!     println!("{:?}", navigation.view);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod models;
pub mod profile;
pub mod routes;
pub mod schedule;
pub mod store;
pub mod validation;

use std::sync::Arc;

use crate::auth::AuthMachine;
use crate::config::ClientOptions;
use crate::dashboard::{AdminDashboard, ClientDashboard};
use crate::error::Result;
use crate::routes::{Navigation, Router};
use crate::store::{Backend, HttpStore};

/// The application: one backend, one auth machine, one router
pub struct PetHome<B: Backend + 'static> {
    store: Arc<B>,
    auth: AuthMachine<B>,
    router: Router,
}

impl PetHome<HttpStore> {
    /// Connect to a hosted Supabase project
    pub fn connect(options: ClientOptions) -> Result<Self> {
        log::debug!("Connecting to {}", options.base_url());
        Ok(Self::with_backend(HttpStore::new(options)?))
    }

    /// Connect using `SUPABASE_URL` / `SUPABASE_ANON_KEY` and friends
    pub fn from_env() -> Result<Self> {
        Self::connect(ClientOptions::from_env()?)
    }
}

impl<B: Backend + 'static> PetHome<B> {
    /// Build the application over any backend. Must be called from within
    /// a Tokio runtime.
    pub fn with_backend(store: B) -> Self {
        Self::with_shared_backend(Arc::new(store))
    }

    pub fn with_shared_backend(store: Arc<B>) -> Self {
        let auth = AuthMachine::new(Arc::clone(&store));
        let router = Router::new(auth.subscribe());
        Self {
            store,
            auth,
            router,
        }
    }

    pub fn store(&self) -> &Arc<B> {
        &self.store
    }

    pub fn auth(&self) -> &AuthMachine<B> {
        &self.auth
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Resolve `path` against the current auth state
    pub fn navigate(&self, path: &str) -> Navigation {
        self.router.navigate(path)
    }

    /// The client dashboard, if the current user may open it
    pub fn client_dashboard(&self) -> Result<ClientDashboard<B>> {
        ClientDashboard::open(Arc::clone(&self.store), &self.auth.state())
    }

    /// The admin dashboard, if the current user may open it
    pub fn admin_dashboard(&self) -> Result<AdminDashboard<B>> {
        AdminDashboard::open(Arc::clone(&self.store), &self.auth.state())
    }

    /// Stop listening to session changes
    pub fn shutdown(&self) {
        self.auth.shutdown();
    }
}

/// Commonly used types
pub mod prelude {
    pub use crate::auth::{AuthFailure, AuthMachine, AuthState, Registration, Session};
    pub use crate::config::ClientOptions;
    pub use crate::dashboard::{AdminDashboard, ClientDashboard, Stats};
    pub use crate::error::{Error, Result};
    pub use crate::guard::{GuardDecision, Requirement};
    pub use crate::models::*;
    pub use crate::profile::{Profile, Role, UserProfile};
    pub use crate::routes::{Navigation, Route, View};
    pub use crate::store::{Backend, HttpStore, MemoryStore};
    pub use crate::validation::{LoginForm, RegistrationForm, UserForm};
    pub use crate::PetHome;
}
