//! services/api/src/lib.rs
//!
//! Library surface of the api service: configuration, the Postgres and
//! HTTP adapters, and the Axum web layer. The `api` and `bridge` binaries
//! are thin assemblies over this crate.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
