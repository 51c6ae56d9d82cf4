//! flowcal common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the calibration crates:
//! - Entity identity types plus the `EntityKey` bound
//! - Run identifiers for calibration runs
//! - The unified error type with stable numeric codes
//! - Schema versioning for persisted files

pub mod error;
pub mod id;
pub mod schema;

pub use error::{Error, Result};
pub use id::{EntityId, EntityKey, RunId};
pub use schema::SCHEMA_VERSION;
