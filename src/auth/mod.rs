//! Authentication: sessions, token claims, persistence and the auth state
//! machine

pub mod claims;
mod machine;
mod messages;
mod persist;
mod session;

pub use claims::Claims;
pub use machine::*;
pub use messages::{describe, translate};
pub use persist::*;
pub use session::*;
