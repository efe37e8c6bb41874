use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dto::proposal_dto::validate_amount;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateMilestonePayload {
    #[validate(length(min = 1))]
    pub title: String,
    pub description: String,
    #[validate(custom(function = "validate_amount"))]
    pub amount: Decimal,
    pub due_at: Option<DateTime<Utc>>,
}
