//! Core data models for the file service.
//!
//! `FileRecord` is the registry's internal metadata, `FileSummary` is what
//! clients see, and `ApiResponse` is the JSON envelope every endpoint uses.

pub mod envelope;
pub mod file;
