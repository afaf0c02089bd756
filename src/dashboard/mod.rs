//! Role-gated operations behind the two dashboards
//!
//! A dashboard is only handed out when the route guard would render its
//! view, so every operation runs on behalf of a known profile.

mod admin;
mod client;

use crate::auth::AuthState;
use crate::error::{Error, Result};
use crate::guard::{decide, GuardDecision, Requirement};
use crate::profile::{Role, UserProfile};

pub use admin::{AdminDashboard, Stats};
pub use client::ClientDashboard;

/// Pet columns with the owner's name and email
const PET_WITH_OWNER: &str = "*, users(name, email)";

/// Appointment columns with the pet's name and species
const APPOINTMENT_WITH_PET: &str = "*, pets(name, species)";

/// Appointment columns with pet and owner
const APPOINTMENT_FULL: &str = "*, pets(name, species), users(name, email)";

/// Exam columns with the pet's name and species
const EXAM_WITH_PET: &str = "*, pets(name, species)";

/// Profile of the user in `state` if they may open a view needing `role`.
fn authorize(state: &AuthState, role: Role) -> Result<UserProfile> {
    match decide(state, &Requirement::role(role)) {
        GuardDecision::Render => state
            .profile()
            .map(|profile| profile.user().clone())
            .ok_or(Error::NotAuthenticated),
        GuardDecision::ShowDenied { required } => Err(Error::Forbidden { required }),
        GuardDecision::Redirect(_) | GuardDecision::ShowLoading => Err(Error::NotAuthenticated),
    }
}

/// Take the single row an update or insert was expected to touch
fn single<T>(rows: Vec<T>, what: &str) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| Error::database(format!("{what} not found")))
}
