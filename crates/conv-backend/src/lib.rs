//! Boundary to the external conversion backend.
//!
//! The backend rewrites code; this crate only defines what it is handed, what it must produce,
//! and two ways of reaching it: an external command, or recorded responses replayed from a
//! scenario's `backend/` directory.

pub mod command;
pub mod fixture;
pub mod types;

pub use command::*;
pub use fixture::*;
pub use types::*;
