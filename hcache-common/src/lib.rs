// hcache-common - Shared types for the HCache client
//
// This crate defines the error taxonomy, the cancellation context and the
// command request shared by the client and its callers.

pub mod command;
pub mod context;
pub mod error;

// Re-export for convenience
pub use command::*;
pub use context::*;
pub use error::*;
