//! Database access layer
//!
//! Connection opening (plain and notification-capable) and the dynamic
//! value model shared by the routine gateway and the conformance engine.

pub mod connect;
pub mod types;

// Re-export main types
pub use types::{FromSqlRow, SqlRow, SqlValue};
