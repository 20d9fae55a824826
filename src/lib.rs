//! filedrop — upload files over HTTP, list them, and download them by id.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
mod test_support;
