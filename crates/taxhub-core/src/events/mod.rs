//! Domain events emitted by TaxHub job operations.
//!
//! Events are published through the [`EventSink`] collaborator and
//! consumed by the Server-Sent-Events push layer.
//!
//! [`EventSink`]: crate::traits::notifier::EventSink

pub mod job;

pub use job::{JobEvent, JobEventKind};
