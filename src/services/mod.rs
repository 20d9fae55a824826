//! Core services: identifier generation, the file registry, storage backends
//! and the `FileService` that ties them together for the HTTP layer.

pub mod file_service;
pub mod id_generator;
pub mod registry;
pub mod storage_service;
