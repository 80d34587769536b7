//! Core data models for the file storage service.
//!
//! Descriptors serialize as JSON via `serde` and are persisted by the
//! ledger implementations.

pub mod descriptor;
