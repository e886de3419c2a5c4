//! # taxhub-entity
//!
//! Domain entity models for TaxHub. Currently this is the background
//! job document and its sub-records; the job record store is the single
//! source of truth for these.

pub mod job;
