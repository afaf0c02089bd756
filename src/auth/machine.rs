//! Authentication state machine
//!
//! The machine owns the current session and the profile resolved for it and
//! publishes every change through a `watch` channel. Session changes arrive
//! only as store notifications: `login` and `logout` ask the store to act and
//! the listener task moves the state when the store reports back.
//!
//! Profile loading is asynchronous. Each transition bumps a generation
//! counter while the state lock is held, and a finished profile lookup is only
//! committed if no newer transition happened in the meantime.

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{claims, messages, AuthUser, Session, SessionEvent};
use crate::error::Error;
use crate::models::UserRecord;
use crate::profile::{FallbackReason, Profile, Role, UserProfile};
use crate::store::{Backend, Collection, Query, RecordStoreExt};
use crate::validation::{LoginForm, RegistrationForm, ValidationErrors};

/// Columns read to resolve a profile
const PROFILE_COLUMNS: &str = "id, name, email, phone, role_id";

/// Password used to probe whether an account exists
const PROBE_PASSWORD: &str = "dummy_password_to_check_existence";

/// Where the machine stands
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// Nothing known yet
    Unknown,
    /// Looking up the stored session
    Loading,
    Authenticated { session: Session, profile: Profile },
    Anonymous,
}

impl AuthState {
    /// Whether the machine has reached a definite answer
    pub fn is_settled(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. } | AuthState::Anonymous)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            AuthState::Authenticated { profile, .. } => Some(profile),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.profile().map(Profile::role)
    }
}

/// Why an auth operation did not go through
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthFailure {
    /// The form was rejected before calling the service
    #[error("{0}")]
    Invalid(ValidationErrors),
    /// The service refused; the message is already translated
    #[error("{0}")]
    Rejected(String),
    /// Anything else
    #[error("{0}")]
    Unexpected(String),
}

impl AuthFailure {
    fn from_error(error: &Error, unexpected: &str) -> Self {
        match error {
            Error::Validation(errors) => AuthFailure::Invalid(errors.clone()),
            Error::Store { .. } | Error::Auth(_) | Error::Http(_) => {
                AuthFailure::Rejected(messages::describe(error))
            }
            _ => AuthFailure::Unexpected(unexpected.to_string()),
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Outcome of writing the `users` row after a sign-up
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileWrite {
    Created,
    Failed(String),
}

/// A successful registration
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub user: AuthUser,
    /// Present when the service signed the user in right away
    pub session: Option<Session>,
    pub profile_record: ProfileWrite,
}

struct Inner<B> {
    store: Arc<B>,
    state: watch::Sender<AuthState>,
    generation: AtomicU64,
}

impl<B: Backend + 'static> Inner<B> {
    /// Apply `update` and return the generation it leaves behind. Only an
    /// update that returns true counts as a transition: it bumps the
    /// generation and notifies watchers.
    fn transition(&self, update: impl FnOnce(&mut AuthState) -> bool) -> u64 {
        let mut generation = 0;
        self.state.send_if_modified(|state| {
            let changed = update(state);
            generation = if changed {
                self.generation.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                self.generation.load(Ordering::SeqCst)
            };
            changed
        });
        generation
    }

    /// Replace the state unless a newer transition has happened
    fn commit(&self, generation: u64, next: AuthState) -> bool {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *state = next;
            true
        })
    }

    fn handle(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => {
                self.authenticated(session)
            }
            SessionEvent::SignedOut | SessionEvent::Expired => {
                log::info!("Session ended ({event:?}), switching to anonymous");
                self.transition(|state| {
                    *state = AuthState::Anonymous;
                    true
                });
            }
        }
    }

    fn authenticated(self: &Arc<Self>, session: Session) {
        let mut needs_profile = true;
        let generation = self.transition(|state| {
            let kept = match state {
                AuthState::Authenticated { session: current, profile }
                    if current.user.id == session.user.id && profile.is_resolved() =>
                {
                    Some(profile.clone())
                }
                _ => None,
            };
            needs_profile = kept.is_none();
            let profile = kept.unwrap_or_else(|| {
                Profile::fallback(provisional_profile(&session), FallbackReason::Pending)
            });
            *state = AuthState::Authenticated {
                session: session.clone(),
                profile,
            };
            true
        });

        if !needs_profile {
            log::debug!("Token refreshed for {}, keeping profile", session.user.id);
            return;
        }

        log::debug!("Loading profile for {}", session.user.id);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let profile = inner.resolve_profile(&session).await;
            let next = AuthState::Authenticated { session, profile };
            if !inner.commit(generation, next) {
                log::debug!("Discarding stale profile lookup");
            }
        });
    }

    async fn resolve_profile(&self, session: &Session) -> Profile {
        let query = Query::new().select(PROFILE_COLUMNS).eq("id", &session.user.id);
        match self
            .store
            .select_one::<UserRecord>(Collection::Users, &query)
            .await
        {
            Ok(Some(record)) => Profile::Resolved(UserProfile::from_record(&record)),
            Ok(None) => {
                log::warn!("No users row for {}, using a fallback profile", session.user.id);
                Profile::fallback(provisional_profile(session), FallbackReason::Missing)
            }
            Err(e) => {
                log::warn!("Profile lookup for {} failed: {}", session.user.id, e);
                Profile::fallback(
                    provisional_profile(session),
                    FallbackReason::Failed(e.message()),
                )
            }
        }
    }
}

/// Profile built from the identity alone, or from the token claims when the
/// identity carries nothing usable.
fn provisional_profile(session: &Session) -> UserProfile {
    let user = &session.user;
    let has_identity_data =
        user.email.as_deref().map_or(false, |e| !e.is_empty()) || user.metadata_str("name").is_some();
    if has_identity_data {
        return UserProfile::from_identity(user);
    }
    match claims::peek(&session.access_token) {
        Ok(claims) if claims.sub == user.id => UserProfile::from_claims(&claims),
        _ => UserProfile::from_identity(user),
    }
}

async fn listen<B: Backend + 'static>(inner: Arc<Inner<B>>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => inner.handle(event),
            Err(RecvError::Lagged(missed)) => {
                log::warn!("Auth listener missed {missed} session events");
            }
            Err(RecvError::Closed) => {
                log::debug!("Session event stream closed");
                break;
            }
        }
    }
}

/// Session and profile of the current user
pub struct AuthMachine<B: Backend + 'static> {
    inner: Arc<Inner<B>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Backend + 'static> AuthMachine<B> {
    /// Create the machine and start listening to the store. Must be called
    /// from within a Tokio runtime.
    pub fn new(store: Arc<B>) -> Self {
        let events = store.subscribe();
        let (state, _) = watch::channel(AuthState::Unknown);
        let inner = Arc::new(Inner {
            store,
            state,
            generation: AtomicU64::new(0),
        });
        let listener = tokio::spawn(listen(Arc::clone(&inner), events));

        Self {
            inner,
            listener: Mutex::new(Some(listener)),
        }
    }

    pub fn store(&self) -> &Arc<B> {
        &self.inner.store
    }

    /// Look up the stored session and settle on `Authenticated` or
    /// `Anonymous`.
    pub async fn initialize(&self) -> AuthState {
        let generation = self.inner.transition(|state| {
            *state = AuthState::Loading;
            true
        });

        let next = match self.inner.store.get_session().await {
            Ok(Some(session)) => {
                log::info!("Found session for {}", session.user.id);
                let profile = self.inner.resolve_profile(&session).await;
                AuthState::Authenticated { session, profile }
            }
            Ok(None) => {
                log::debug!("No stored session");
                AuthState::Anonymous
            }
            Err(e) => {
                log::warn!("Could not read the session: {}", e);
                AuthState::Anonymous
            }
        };

        if !self.inner.commit(generation, next) {
            log::debug!("Initialization superseded by a session event");
        }
        self.state()
    }

    /// Wait until the machine is `Authenticated` or `Anonymous`
    pub async fn settled(&self) -> AuthState {
        let mut rx = self.inner.state.subscribe();
        let result = rx.wait_for(AuthState::is_settled).await.map(|state| state.clone());
        result.unwrap_or_else(|_| self.state())
    }

    /// Sign in. The state follows once the store reports the new session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthFailure> {
        let form = LoginForm {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        form.validate().map_err(AuthFailure::Invalid)?;

        self.inner
            .store
            .sign_in(&form.email, &form.password)
            .await
            .map_err(|e| {
                log::warn!("Login failed: {}", e);
                AuthFailure::from_error(&e, "Error inesperado durante el login")
            })
    }

    /// Create the identity and then, best effort, its `users` row.
    pub async fn register(&self, form: &RegistrationForm) -> Result<Registration, AuthFailure> {
        form.validate().map_err(AuthFailure::Invalid)?;

        let email = form.email.trim();
        let metadata = json!({ "name": form.name.trim(), "phone": form.phone.trim() });
        let signed_up = self
            .inner
            .store
            .sign_up(email, &form.password, metadata)
            .await
            .map_err(|e| {
                log::warn!("Sign-up failed: {}", e);
                AuthFailure::from_error(&e, "Error inesperado durante el registro")
            })?;

        let row = json!({
            "id": signed_up.user.id,
            "name": form.name.trim(),
            "email": email,
            "phone": form.phone.trim(),
            "role_id": Role::Client.id(),
        });

        let profile_record = match self.inner.store.insert(Collection::Users, row).await {
            Ok(_) => ProfileWrite::Created,
            Err(e) => {
                log::warn!("Could not create the users row for {}: {}", signed_up.user.id, e);
                ProfileWrite::Failed(e.message())
            }
        };

        if profile_record == ProfileWrite::Created && signed_up.session.is_some() {
            self.reload_profile().await;
        }

        Ok(Registration {
            user: signed_up.user,
            session: signed_up.session,
            profile_record,
        })
    }

    /// Sign out. The state follows once the store reports it.
    pub async fn logout(&self) -> Result<(), AuthFailure> {
        self.inner.store.sign_out().await.map_err(|e| {
            log::warn!("Sign-out reported an error: {}", e);
            AuthFailure::from_error(&e, "Error inesperado al cerrar sesión")
        })
    }

    /// Resolve the profile of the current session again
    pub async fn reload_profile(&self) -> Option<Profile> {
        let mut current = None;
        let generation = self.inner.transition(|state| {
            current = state.session().cloned();
            false
        });
        let session = current?;

        let profile = self.inner.resolve_profile(&session).await;
        let next = AuthState::Authenticated {
            session,
            profile: profile.clone(),
        };
        self.inner.commit(generation, next).then_some(profile)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.inner.state.borrow().role() == Some(role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session().cloned()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile().cloned()
    }

    /// Receiver that sees every state change
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Whether an account exists for `email`, probed with a sign-in that
    /// cannot succeed.
    pub async fn check_user_exists(&self, email: &str) -> bool {
        match self.inner.store.sign_in(email.trim(), PROBE_PASSWORD).await {
            Ok(_) => true,
            Err(Error::Store { message, .. }) => !message.contains("Invalid login credentials"),
            Err(e) => {
                log::debug!("Account probe failed: {}", e);
                false
            }
        }
    }

    /// Round trip to the service
    pub async fn test_connection(&self) -> Result<(), AuthFailure> {
        self.inner.store.get_session().await.map(|_| ()).map_err(|e| {
            log::warn!("Connection test failed: {}", e);
            AuthFailure::from_error(&e, "Error inesperado al conectar")
        })
    }

    /// Stop listening to session changes
    pub fn shutdown(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            log::debug!("Stopping auth listener");
            handle.abort();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl<B: Backend + 'static> Drop for AuthMachine<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
