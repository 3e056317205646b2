//! Core types and error handling for itch-setup.
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`SetupError`]) for the failure kinds that
//!    drive policy: plan demotion, archive fallback, and silent cancellation.
//! 2. **`anyhow` context** everywhere else, so call sites stay readable and
//!    errors carry their full chain when they reach the user.

pub mod error;

pub use error::SetupError;
