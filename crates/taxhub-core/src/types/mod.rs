//! Shared type definitions: typed identifiers and pagination.

pub mod id;
pub mod pagination;
