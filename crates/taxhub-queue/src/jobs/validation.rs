//! Filing data validation handler.
//!
//! Runs a set of structural checks over the form data in the job
//! payload. Validation findings are the job's *output*, not a job
//! failure; only a malformed payload fails the job.

use async_trait::async_trait;
use serde_json::{json, Value};

use taxhub_entity::job::{Job, JobProgress, JobType};

use crate::context::JobContext;
use crate::executor::{JobExecutionError, JobHandler};

const FILING_STATUSES: [&str; 4] = [
    "single",
    "married_joint",
    "married_separate",
    "head_of_household",
];

const INCOME_FIELDS: [&str; 4] = ["wages", "interest_income", "dividends", "self_employment"];

/// Handler for [`JobType::DataValidation`] jobs.
#[derive(Debug, Default)]
pub struct DataValidationHandler;

impl DataValidationHandler {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }

    fn check_form(form: &Value, issues: &mut Vec<Value>) {
        match form.get("tax_year").and_then(Value::as_i64) {
            Some(year) if (2000..=2100).contains(&year) => {}
            Some(year) => issues.push(json!({
                "field": "tax_year",
                "message": format!("tax year {year} is out of range"),
            })),
            None => issues.push(json!({
                "field": "tax_year",
                "message": "tax_year is required and must be an integer",
            })),
        }

        match form.get("filing_status").and_then(Value::as_str) {
            Some(status) if FILING_STATUSES.contains(&status) => {}
            Some(status) => issues.push(json!({
                "field": "filing_status",
                "message": format!("unknown filing status '{status}'"),
            })),
            None => issues.push(json!({
                "field": "filing_status",
                "message": "filing_status is required",
            })),
        }
    }

    fn check_income(form: &Value, issues: &mut Vec<Value>) {
        for field in INCOME_FIELDS {
            if let Some(value) = form.get(field) {
                match value.as_f64() {
                    Some(amount) if amount >= 0.0 => {}
                    _ => issues.push(json!({
                        "field": field,
                        "message": format!("{field} must be a non-negative number"),
                    })),
                }
            }
        }
    }
}

#[async_trait]
impl JobHandler for DataValidationHandler {
    fn job_type(&self) -> JobType {
        JobType::DataValidation
    }

    async fn execute(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        let form = job
            .payload
            .get("form")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                JobExecutionError::Permanent("payload must carry a 'form' object".to_string())
            })?;
        let form = Value::Object(form.clone());

        let mut issues = Vec::new();

        ctx.checkpoint()?;
        Self::check_form(&form, &mut issues);
        ctx.update_progress(JobProgress::at(50, "checking income fields"))
            .await?;

        ctx.checkpoint()?;
        Self::check_income(&form, &mut issues);

        Ok(Some(json!({
            "valid": issues.is_empty(),
            "issues": issues,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_form_produces_no_issues() {
        let form = json!({
            "tax_year": 2025,
            "filing_status": "single",
            "wages": 54000.0,
        });
        let mut issues = Vec::new();
        DataValidationHandler::check_form(&form, &mut issues);
        DataValidationHandler::check_income(&form, &mut issues);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_bad_fields_are_collected() {
        let form = json!({
            "tax_year": 1950,
            "filing_status": "widowed",
            "wages": -3.0,
        });
        let mut issues = Vec::new();
        DataValidationHandler::check_form(&form, &mut issues);
        DataValidationHandler::check_income(&form, &mut issues);
        assert_eq!(issues.len(), 3);
    }
}
