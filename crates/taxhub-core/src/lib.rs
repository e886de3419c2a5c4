//! # taxhub-core
//!
//! Core crate for the TaxHub backend. Contains configuration schemas,
//! typed identifiers, job domain events, pagination types, the
//! event-sink collaborator trait, and the unified error system.
//!
//! This crate has **no** internal dependencies on other TaxHub crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
