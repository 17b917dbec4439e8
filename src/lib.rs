//! Object storage layer of the municipal council portal.
//!
//! Path codec, ACL policies, upload sessions, legacy file migration and the
//! upload-directory audit, plus the HTTP surface in front of them.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
