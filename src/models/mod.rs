//! Core data models for the council storage layer.
//!
//! Stored objects and their metadata map to SQLite rows via `sqlx::FromRow`;
//! policies, migration records and audit reports serialize as JSON via `serde`.

pub mod audit;
pub mod category;
pub mod diagnostics;
pub mod metadata;
pub mod migration;
pub mod object;
pub mod policy;
