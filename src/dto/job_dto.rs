use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::job::{BudgetRange, PricingType, WorkLocation};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateJobPayload {
    pub client_id: Uuid,
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub description: String,
    pub skills: Vec<String>,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(custom(function = "validate_budget"))]
    pub budget: BudgetRange,
    #[serde(rename = "type")]
    pub pricing: PricingType,
    pub duration: Option<String>,
    pub location: WorkLocation,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update; unset fields are left untouched both locally and in the
/// remote patch.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateJobPayload {
    #[validate(length(min = 1))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[validate(length(min = 1))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[validate(custom(function = "validate_budget"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

pub fn validate_budget(budget: &BudgetRange) -> Result<(), ValidationError> {
    if budget.min > budget.max {
        return Err(ValidationError::new("budget_min_exceeds_max"));
    }
    if budget.min < Decimal::ZERO {
        return Err(ValidationError::new("budget_negative"));
    }
    Ok(())
}
