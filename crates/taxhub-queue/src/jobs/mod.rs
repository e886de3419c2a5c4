//! Built-in job handlers.

pub mod cleanup;
pub mod validation;

pub use cleanup::RetentionCleanupHandler;
pub use validation::DataValidationHandler;
