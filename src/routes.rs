//! Route table and navigation

use std::fmt;
use tokio::sync::watch;

use crate::auth::AuthState;
use crate::guard::{decide, GuardDecision, GuardWatcher, Requirement};
use crate::profile::Role;

/// Redirects followed before giving up on a navigation
const MAX_REDIRECTS: usize = 4;

/// Known paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Landing,
    Login,
    Register,
    ClientDashboard,
    AdminDashboard,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Landing,
        Route::Login,
        Route::Register,
        Route::ClientDashboard,
        Route::AdminDashboard,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Route::Landing => "/",
            Route::Login => "/login",
            Route::Register => "/register",
            Route::ClientDashboard => "/dashboard",
            Route::AdminDashboard => "/admin",
        }
    }

    /// Match a path, ignoring the query string and trailing slashes
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        let path = if trimmed.is_empty() { "/" } else { trimmed };
        Self::ALL.into_iter().find(|route| route.path() == path)
    }

    /// Guard in front of the route, if any
    pub fn requirement(self) -> Option<Requirement> {
        match self {
            Route::ClientDashboard => Some(Requirement::role(Role::Client)),
            Route::AdminDashboard => Some(Requirement::role(Role::Admin)),
            _ => None,
        }
    }

    /// Where a user lands after signing in
    pub fn home_for(role: Role) -> Route {
        match role {
            Role::Admin => Route::AdminDashboard,
            Role::Client => Route::ClientDashboard,
        }
    }

    fn view(self) -> View {
        match self {
            Route::Landing => View::Landing,
            Route::Login => View::Login,
            Route::Register => View::Register,
            Route::ClientDashboard => View::ClientDashboard,
            Route::AdminDashboard => View::AdminDashboard,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Post-login destination path for `role`
pub fn home_for(role: Role) -> &'static str {
    Route::home_for(role).path()
}

/// What ends up on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Landing,
    Login,
    Register,
    ClientDashboard,
    AdminDashboard,
    Loading,
    Denied { required: Role },
}

/// Outcome of one navigation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Show(View),
    Redirect(String),
}

/// Apply the route table and guard to `path` in `state`.
pub fn route(state: &AuthState, path: &str) -> Step {
    let Some(route) = Route::parse(path) else {
        return Step::Redirect(Route::Landing.path().to_string());
    };
    let Some(requirement) = route.requirement() else {
        return Step::Show(route.view());
    };
    match decide(state, &requirement) {
        GuardDecision::Render => Step::Show(route.view()),
        GuardDecision::Redirect(to) => Step::Redirect(to),
        GuardDecision::ShowLoading => Step::Show(View::Loading),
        GuardDecision::ShowDenied { required } => Step::Show(View::Denied { required }),
    }
}

/// A navigation with its redirects followed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    /// Path finally shown
    pub path: String,
    pub view: View,
    /// Paths passed through on the way
    pub redirects: Vec<String>,
}

impl Navigation {
    pub fn was_redirected(&self) -> bool {
        !self.redirects.is_empty()
    }
}

/// Navigation over the auth machine's live state
#[derive(Clone)]
pub struct Router {
    state: watch::Receiver<AuthState>,
}

impl Router {
    pub fn new(state: watch::Receiver<AuthState>) -> Self {
        Self { state }
    }

    pub fn navigate(&self, path: &str) -> Navigation {
        let state = self.state.borrow().clone();
        let mut current = path.to_string();
        let mut redirects = Vec::new();

        loop {
            match route(&state, &current) {
                Step::Show(view) => {
                    return Navigation {
                        path: current,
                        view,
                        redirects,
                    }
                }
                Step::Redirect(to) if redirects.len() < MAX_REDIRECTS => {
                    log::debug!("Redirecting {current} -> {to}");
                    redirects.push(std::mem::replace(&mut current, to));
                }
                Step::Redirect(to) => {
                    log::warn!("Too many redirects navigating to {path}, stopping at {to}");
                    return Navigation {
                        path: Route::Landing.path().to_string(),
                        view: View::Landing,
                        redirects,
                    };
                }
            }
        }
    }

    /// Guard watcher for a protected route
    pub fn watch(&self, route: Route) -> Option<GuardWatcher> {
        route
            .requirement()
            .map(|requirement| GuardWatcher::new(self.state.clone(), requirement))
    }
}
