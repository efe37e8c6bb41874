use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milestones are owned by the entity store and reached through the
/// contract -> milestones index, in negotiation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,
    pub proposal_id: Uuid,
    pub terms: String,
    pub status: ContractStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ContractStatus {
    Active,
    Completed,
    Cancelled,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Completed => "completed",
            ContractStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: ContractStatus) -> bool {
        self == ContractStatus::Active && next != ContractStatus::Active
    }

    pub fn is_terminal(self) -> bool {
        self != ContractStatus::Active
    }
}
