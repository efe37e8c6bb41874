//! Pure list derivation: given a source collection, a filter spec and a sort
//! key, produce the display list. Same inputs always give the same output;
//! the source slice is never mutated, so any dependency change can simply
//! re-derive from scratch.

use rust_decimal::Decimal;
use std::cmp::Reverse;

use crate::models::job::{Job, JobStatus, PricingType, WorkLocation};
use crate::models::user::{Availability, FreelancerProfile, User};

/// Categorical filter with an explicit "all" sentinel that disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select<T> {
    All,
    Only(T),
}

impl<T> Default for Select<T> {
    fn default() -> Self {
        Select::All
    }
}

impl<T: PartialEq> Select<T> {
    fn admits(&self, value: &T) -> bool {
        match self {
            Select::All => true,
            Select::Only(wanted) => wanted == value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Case-insensitive substring over title + description. Empty matches all.
    pub search: String,
    /// Exact category; empty disables.
    pub category: String,
    /// At least one listed skill must be present; empty disables.
    pub skills: Vec<String>,
    pub pricing: Select<PricingType>,
    pub status: Select<JobStatus>,
    pub location: Select<WorkLocation>,
    /// Budget bounds match on range overlap, not containment: a job passes
    /// when job.budget.max >= min and job.budget.min <= max. Absent bound is
    /// unbounded on that side.
    pub budget_min: Option<Decimal>,
    pub budget_max: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobSort {
    #[default]
    Newest,
    BudgetHighToLow,
    BudgetLowToHigh,
}

#[derive(Debug, Clone, Default)]
pub struct FreelancerFilter {
    /// Case-insensitive substring over name + title + skills.
    pub search: String,
    pub skills: Vec<String>,
    pub availability: Select<Availability>,
    pub hourly_rate_min: Option<Decimal>,
    pub hourly_rate_max: Option<Decimal>,
    pub experience_min: Option<i32>,
    pub experience_max: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreelancerSort {
    #[default]
    Newest,
    HourlyRateHighToLow,
    HourlyRateLowToHigh,
    ExperienceLevel,
}

pub fn derive_job_list(jobs: &[Job], filter: &JobFilter, sort: JobSort) -> Vec<Job> {
    let search = filter.search.to_lowercase();
    let mut out: Vec<Job> = jobs
        .iter()
        .filter(|job| job_matches(job, filter, &search))
        .cloned()
        .collect();
    sort_jobs(&mut out, sort);
    out
}

fn job_matches(job: &Job, filter: &JobFilter, search_lower: &str) -> bool {
    if !search_lower.is_empty() {
        let haystack = format!("{} {}", job.title, job.description).to_lowercase();
        if !haystack.contains(search_lower) {
            return false;
        }
    }
    if !filter.category.is_empty() && job.category != filter.category {
        return false;
    }
    if !filter.skills.is_empty() && !filter.skills.iter().any(|s| job.skills.contains(s)) {
        return false;
    }
    if !filter.pricing.admits(&job.pricing) {
        return false;
    }
    if !filter.status.admits(&job.status) {
        return false;
    }
    if !filter.location.admits(&job.location) {
        return false;
    }
    if let Some(min) = filter.budget_min {
        if job.budget.max < min {
            return false;
        }
    }
    if let Some(max) = filter.budget_max {
        if job.budget.min > max {
            return false;
        }
    }
    true
}

fn sort_jobs(jobs: &mut [Job], sort: JobSort) {
    // sort_by_key is stable, so ties keep insertion order.
    match sort {
        JobSort::Newest => jobs.sort_by_key(|j| Reverse(j.created_at)),
        JobSort::BudgetHighToLow => jobs.sort_by_key(|j| Reverse(j.budget.max)),
        JobSort::BudgetLowToHigh => jobs.sort_by_key(|j| j.budget.min),
    }
}

/// Non-freelancer users are skipped; role fields are read only after the
/// tag check.
pub fn derive_freelancer_list(
    users: &[User],
    filter: &FreelancerFilter,
    sort: FreelancerSort,
) -> Vec<User> {
    let search = filter.search.to_lowercase();
    let mut out: Vec<User> = users
        .iter()
        .filter(|user| {
            user.as_freelancer()
                .is_some_and(|profile| freelancer_matches(user, profile, filter, &search))
        })
        .cloned()
        .collect();
    sort_freelancers(&mut out, sort);
    out
}

fn freelancer_matches(
    user: &User,
    profile: &FreelancerProfile,
    filter: &FreelancerFilter,
    search_lower: &str,
) -> bool {
    if !search_lower.is_empty() {
        let haystack = format!(
            "{} {} {}",
            user.name,
            profile.title,
            profile.skills.join(" ")
        )
        .to_lowercase();
        if !haystack.contains(search_lower) {
            return false;
        }
    }
    if !filter.skills.is_empty() && !filter.skills.iter().any(|s| profile.skills.contains(s)) {
        return false;
    }
    if !filter.availability.admits(&profile.availability) {
        return false;
    }
    if let Some(min) = filter.hourly_rate_min {
        if profile.hourly_rate < min {
            return false;
        }
    }
    if let Some(max) = filter.hourly_rate_max {
        if profile.hourly_rate > max {
            return false;
        }
    }
    if let Some(min) = filter.experience_min {
        if profile.experience_years < min {
            return false;
        }
    }
    if let Some(max) = filter.experience_max {
        if profile.experience_years > max {
            return false;
        }
    }
    true
}

fn sort_freelancers(users: &mut [User], sort: FreelancerSort) {
    let rate = |u: &User| u.as_freelancer().map(|p| p.hourly_rate).unwrap_or_default();
    let years = |u: &User| u.as_freelancer().map(|p| p.experience_years).unwrap_or_default();
    match sort {
        FreelancerSort::Newest => users.sort_by_key(|u| Reverse(u.created_at)),
        FreelancerSort::HourlyRateHighToLow => users.sort_by_key(|u| Reverse(rate(u))),
        FreelancerSort::HourlyRateLowToHigh => users.sort_by_key(rate),
        FreelancerSort::ExperienceLevel => users.sort_by_key(|u| Reverse(years(u))),
    }
}
