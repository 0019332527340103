//! Core data models for the upload and artifact API.
//!
//! Rows map to SQLite tables via `sqlx::FromRow`; the `*Response` types are
//! the JSON shapes handed to clients.

pub mod artifact;
pub mod page;
pub mod upload;
