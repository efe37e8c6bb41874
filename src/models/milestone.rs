use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub due_at: Option<DateTime<Utc>>,
    pub status: MilestoneStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Submitted,
    Approved,
    Released,
    Rejected,
}

impl MilestoneStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in-progress",
            MilestoneStatus::Submitted => "submitted",
            MilestoneStatus::Approved => "approved",
            MilestoneStatus::Released => "released",
            MilestoneStatus::Rejected => "rejected",
        }
    }

    /// Forward-only: pending -> in-progress -> submitted -> approved ->
    /// released. A client may reject a submitted deliverable; rejected is
    /// terminal.
    pub fn can_transition_to(self, next: MilestoneStatus) -> bool {
        use MilestoneStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Submitted)
                | (Submitted, Approved)
                | (Submitted, Rejected)
                | (Approved, Released)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MilestoneStatus::Released | MilestoneStatus::Rejected)
    }
}
