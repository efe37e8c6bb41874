use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub job_id: Uuid,
    pub freelancer_id: Uuid,
    pub cover_letter: String,
    pub bid: Decimal,
    pub estimated_duration: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ProposalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Withdrawn => "withdrawn",
        }
    }

    /// All transitions start at pending; accepted, rejected and withdrawn
    /// are terminal.
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        self == ProposalStatus::Pending && next != ProposalStatus::Pending
    }

    pub fn is_terminal(self) -> bool {
        self != ProposalStatus::Pending
    }
}
