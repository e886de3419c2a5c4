//! Collaborator traits implemented outside this crate.

pub mod notifier;

pub use notifier::EventSink;
