use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitProposalPayload {
    pub job_id: Uuid,
    pub freelancer_id: Uuid,
    #[validate(length(min = 1))]
    pub cover_letter: String,
    #[validate(custom(function = "validate_amount"))]
    pub bid: Decimal,
    #[validate(length(min = 1))]
    pub estimated_duration: String,
}

pub fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount_not_positive"));
    }
    Ok(())
}
