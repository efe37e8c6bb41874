use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use marketplace_core::dto::job_dto::CreateJobPayload;
use marketplace_core::dto::milestone_dto::CreateMilestonePayload;
use marketplace_core::dto::proposal_dto::SubmitProposalPayload;
use marketplace_core::models::job::{BudgetRange, Job, JobStatus, PricingType, WorkLocation};
use marketplace_core::models::user::{Availability, FreelancerProfile, Profile, User};
use marketplace_core::remote::MemoryBackend;
use marketplace_core::services::lifecycle_service::AcceptPolicy;
use marketplace_core::CoreState;

pub fn state(policy: AcceptPolicy) -> (CoreState, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let core = CoreState::with_staleness(backend.clone(), policy, Duration::seconds(300));
    (core, backend)
}

/// Core wired so every cached entity counts as stale, forcing guards to
/// re-fetch the authoritative record.
pub fn stale_state(policy: AcceptPolicy) -> (CoreState, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let core = CoreState::with_staleness(backend.clone(), policy, Duration::seconds(-1));
    (core, backend)
}

pub fn job_payload(client_id: Uuid, min: i64, max: i64) -> CreateJobPayload {
    CreateJobPayload {
        client_id,
        title: "Build a mobile app".to_string(),
        description: "Cross-platform shopping app with payment integration".to_string(),
        skills: vec!["React Native".to_string(), "TypeScript".to_string()],
        category: "Web Development".to_string(),
        budget: BudgetRange {
            min: Decimal::from(min),
            max: Decimal::from(max),
        },
        pricing: PricingType::Fixed,
        duration: Some("3 months".to_string()),
        location: WorkLocation::Remote,
        expires_at: None,
    }
}

pub fn proposal_payload(job_id: Uuid, freelancer_id: Uuid, bid: i64) -> SubmitProposalPayload {
    SubmitProposalPayload {
        job_id,
        freelancer_id,
        cover_letter: "I have shipped three similar apps.".to_string(),
        bid: Decimal::from(bid),
        estimated_duration: "10 weeks".to_string(),
    }
}

pub fn milestone_payload(title: &str, amount: i64) -> CreateMilestonePayload {
    CreateMilestonePayload {
        title: title.to_string(),
        description: "Deliverable as agreed".to_string(),
        amount: Decimal::from(amount),
        due_at: None,
    }
}

pub fn make_job(title: &str, min: i64, max: i64, created_at: DateTime<Utc>) -> Job {
    Job {
        id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        title: title.to_string(),
        description: "A job description".to_string(),
        skills: vec!["Rust".to_string()],
        category: "Web Development".to_string(),
        budget: BudgetRange {
            min: Decimal::from(min),
            max: Decimal::from(max),
        },
        pricing: PricingType::Fixed,
        duration: None,
        status: JobStatus::Open,
        location: WorkLocation::Remote,
        created_at,
        proposal_count: 0,
        expires_at: None,
    }
}

pub fn make_freelancer(name: &str, rate: i64, years: i32, skills: &[&str]) -> User {
    User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        avatar_url: None,
        created_at: Utc::now(),
        profile: Profile::Freelancer(FreelancerProfile {
            title: "Full-stack developer".to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            hourly_rate: Decimal::from(rate),
            bio: "Experienced engineer".to_string(),
            location: None,
            experience_years: years,
            availability: Availability::Available,
        }),
    }
}
