//! Configuration management
//!
//! Handles loading connection profiles and gateway settings.

pub mod connections;
pub mod settings;

pub use connections::{ConnectionConfig, SslMode, find_connection, find_connection_for_profile};
pub use settings::{GatewaySettings, load_settings};
