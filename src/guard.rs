//! Access decisions for protected views

use tokio::sync::watch;

use crate::auth::AuthState;
use crate::profile::Role;

/// Where anonymous visitors are sent by default
pub const DEFAULT_REDIRECT: &str = "/login";

/// What a protected view asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub role: Option<Role>,
    pub redirect_to: String,
}

impl Default for Requirement {
    fn default() -> Self {
        Self {
            role: None,
            redirect_to: DEFAULT_REDIRECT.to_string(),
        }
    }
}

impl Requirement {
    /// Any signed-in user
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// A signed-in user with `role`
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    pub fn redirect_to(mut self, path: &str) -> Self {
        self.redirect_to = path.to_string();
        self
    }
}

/// Outcome of the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    Redirect(String),
    /// "Verificando acceso..." while the session is looked up
    ShowLoading,
    /// "Acceso Denegado"
    ShowDenied { required: Role },
}

impl GuardDecision {
    pub fn is_render(&self) -> bool {
        matches!(self, GuardDecision::Render)
    }
}

/// Decide what a protected view shows in `state`.
///
/// Loading never redirects; anonymous visitors are redirected whatever role
/// the view wants; a signed-in user with the wrong role is denied.
pub fn decide(state: &AuthState, requirement: &Requirement) -> GuardDecision {
    match state {
        AuthState::Unknown | AuthState::Loading => GuardDecision::ShowLoading,
        AuthState::Anonymous => GuardDecision::Redirect(requirement.redirect_to.clone()),
        AuthState::Authenticated { profile, .. } => match requirement.role {
            Some(required) if profile.role() != required => GuardDecision::ShowDenied { required },
            _ => GuardDecision::Render,
        },
    }
}

/// Re-evaluates a requirement every time the auth state changes
pub struct GuardWatcher {
    requirement: Requirement,
    state: watch::Receiver<AuthState>,
}

impl GuardWatcher {
    pub fn new(state: watch::Receiver<AuthState>, requirement: Requirement) -> Self {
        Self { requirement, state }
    }

    /// Decision for the state as it is now
    pub fn current(&self) -> GuardDecision {
        decide(&self.state.borrow(), &self.requirement)
    }

    /// Wait for the next state change and decide again. `None` once the
    /// machine is gone.
    pub async fn next(&mut self) -> Option<GuardDecision> {
        self.state.changed().await.ok()?;
        let decision = decide(&self.state.borrow_and_update(), &self.requirement);
        log::debug!("Guard re-evaluated: {decision:?}");
        Some(decision)
    }

    /// Wait until the decision is no longer `ShowLoading`
    pub async fn settled(&mut self) -> Option<GuardDecision> {
        let requirement = &self.requirement;
        let state = self
            .state
            .wait_for(|state| decide(state, requirement) != GuardDecision::ShowLoading)
            .await
            .ok()?;
        Some(decide(&state, requirement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthUser, Session};
    use crate::profile::{FallbackReason, Profile, UserProfile};
    use serde_json::json;

    fn signed_in(role: Role) -> AuthState {
        let user = AuthUser {
            id: "u1".to_string(),
            email: Some("ana@example.com".to_string()),
            phone: None,
            user_metadata: json!({}),
            created_at: None,
        };
        let mut profile = UserProfile::from_identity(&user);
        profile.role = role;
        AuthState::Authenticated {
            session: Session::new("at".to_string(), "rt".to_string(), user, 3600),
            profile: Profile::Resolved(profile),
        }
    }

    fn requirements() -> Vec<Requirement> {
        vec![
            Requirement::authenticated(),
            Requirement::role(Role::Client),
            Requirement::role(Role::Admin),
            Requirement::role(Role::Admin).redirect_to("/"),
        ]
    }

    #[test]
    fn never_renders_while_loading() {
        for state in [AuthState::Unknown, AuthState::Loading] {
            for requirement in requirements() {
                assert_eq!(decide(&state, &requirement), GuardDecision::ShowLoading);
            }
        }
    }

    #[test]
    fn redirects_exactly_when_anonymous() {
        for requirement in requirements() {
            assert_eq!(
                decide(&AuthState::Anonymous, &requirement),
                GuardDecision::Redirect(requirement.redirect_to.clone())
            );
            for role in [Role::Admin, Role::Client] {
                assert!(!matches!(
                    decide(&signed_in(role), &requirement),
                    GuardDecision::Redirect(_)
                ));
            }
        }
    }

    #[test]
    fn wrong_role_is_denied() {
        assert_eq!(
            decide(&signed_in(Role::Client), &Requirement::role(Role::Admin)),
            GuardDecision::ShowDenied { required: Role::Admin }
        );
        assert_eq!(
            decide(&signed_in(Role::Admin), &Requirement::role(Role::Client)),
            GuardDecision::ShowDenied { required: Role::Client }
        );
        assert!(decide(&signed_in(Role::Admin), &Requirement::role(Role::Admin)).is_render());
        assert!(decide(&signed_in(Role::Client), &Requirement::authenticated()).is_render());
    }

    #[test]
    fn pending_profile_counts_as_client() {
        let AuthState::Authenticated { session, profile } = signed_in(Role::Client) else {
            unreachable!()
        };
        let state = AuthState::Authenticated {
            session,
            profile: Profile::fallback(profile.user().clone(), FallbackReason::Pending),
        };
        assert!(decide(&state, &Requirement::role(Role::Client)).is_render());
        assert!(!decide(&state, &Requirement::role(Role::Admin)).is_render());
    }

    #[tokio::test]
    async fn watcher_follows_state_changes() {
        let (tx, rx) = watch::channel(AuthState::Unknown);
        let mut watcher = GuardWatcher::new(rx, Requirement::role(Role::Admin));
        assert_eq!(watcher.current(), GuardDecision::ShowLoading);

        tx.send_replace(AuthState::Loading);
        assert_eq!(watcher.next().await, Some(GuardDecision::ShowLoading));

        tx.send_replace(AuthState::Anonymous);
        assert_eq!(
            watcher.next().await,
            Some(GuardDecision::Redirect("/login".to_string()))
        );

        tx.send_replace(signed_in(Role::Admin));
        assert_eq!(watcher.settled().await, Some(GuardDecision::Render));

        drop(tx);
        assert_eq!(watcher.next().await, None);
    }
}
