//! Error handling for the PetHome client

use std::fmt;
use thiserror::Error;

use crate::models::AppointmentStatus;
use crate::profile::Role;
use crate::validation::ValidationErrors;

/// Unified error type for the PetHome client
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Session file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The hosted service answered with an error
    #[error("Service error ({status}): {message}")]
    Store {
        /// HTTP status, 0 when the error did not come from an HTTP reply
        status: u16,
        /// Human readable message extracted from the reply
        message: String,
    },

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Database query errors
    #[error("Database error: {0}")]
    Database(String),

    /// Form input rejected before reaching the service
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Appointment status change that the workflow does not allow
    #[error("Invalid appointment transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// An operation needs a session and there is none
    #[error("Not logged in")]
    NotAuthenticated,

    /// The current profile lacks the role an operation requires
    #[error("Access denied: role {required} required")]
    Forbidden { required: Role },
}

impl Error {
    /// Create a new service error
    pub fn store<T: fmt::Display>(status: u16, msg: T) -> Self {
        Error::Store {
            status,
            message: msg.to_string(),
        }
    }

    /// Create a new authentication error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new database error
    pub fn database<T: fmt::Display>(msg: T) -> Self {
        Error::Database(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// The message a form would show for this error
    pub fn message(&self) -> String {
        match self {
            Error::Store { message, .. } => message.clone(),
            Error::Auth(message) | Error::Database(message) | Error::Config(message) => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors)
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
