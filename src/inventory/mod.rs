//! Schema conformance engine
//!
//! Keeps the dispatch engine's assumptions about a database honest: the
//! [`SchemaInspector`] snapshots what exists, [`manifest`] says what each
//! deployment profile requires, and [`ConformanceChecker`] diffs the two,
//! applying the profile's ordered remediation scripts once when they
//! disagree. Runs at startup, before any routine call is issued.

pub mod inspector;
pub mod manifest;
pub mod scripts;
pub mod verify;

pub use inspector::{InventorySnapshot, SchemaInspector};
pub use manifest::{DbObjectRequirement, ObjectType, Profile, manifest_for};
pub use scripts::{RemediationStep, resolve_script_root, steps_for};
pub use verify::{ConformanceChecker, InventoryVerification};
