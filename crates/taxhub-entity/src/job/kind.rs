//! Job type enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of work a job performs. Determines which registered handler
/// executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// OCR and extraction of an uploaded tax document.
    DocumentProcessing,
    /// Tax liability/refund calculation for a session.
    TaxCalculation,
    /// Rendering of a filled tax form.
    FormGeneration,
    /// Validation of entered filing data.
    DataValidation,
    /// Summary/report generation.
    ReportGeneration,
    /// Outbound notification delivery.
    Notification,
    /// Retention cleanup of old records.
    Cleanup,
    /// Data backup.
    Backup,
    /// Uncategorized work.
    Other,
}

impl JobType {
    /// Return the type as a snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentProcessing => "document_processing",
            Self::TaxCalculation => "tax_calculation",
            Self::FormGeneration => "form_generation",
            Self::DataValidation => "data_validation",
            Self::ReportGeneration => "report_generation",
            Self::Notification => "notification",
            Self::Cleanup => "cleanup",
            Self::Backup => "backup",
            Self::Other => "other",
        }
    }

    /// All job types, for aggregation.
    pub const ALL: [JobType; 9] = [
        Self::DocumentProcessing,
        Self::TaxCalculation,
        Self::FormGeneration,
        Self::DataValidation,
        Self::ReportGeneration,
        Self::Notification,
        Self::Cleanup,
        Self::Backup,
        Self::Other,
    ];
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown job type '{s}'"))
    }
}
