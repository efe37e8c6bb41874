pub mod config;
pub mod dto;
pub mod engine;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use crate::engine::{
    derive_freelancer_list, derive_job_list, FreelancerFilter, FreelancerSort, JobFilter, JobSort,
};
use crate::models::job::Job;
use crate::models::user::User;
use crate::remote::TableClient;
use crate::services::lifecycle_service::{AcceptPolicy, LifecycleService};
use crate::services::sync_service::SyncService;
use crate::store::EntityStore;

/// Wires the store, sync layer and lifecycle controller over one remote
/// table client. UI layers hold this by reference and reach everything
/// through it.
#[derive(Clone)]
pub struct CoreState {
    pub store: Arc<EntityStore>,
    pub sync: Arc<SyncService>,
    pub lifecycle: LifecycleService,
}

impl CoreState {
    pub fn new(remote: Arc<dyn TableClient>, policy: AcceptPolicy) -> Self {
        let config = crate::config::get_config();
        Self::with_staleness(remote, policy, config.staleness_threshold())
    }

    pub fn with_staleness(
        remote: Arc<dyn TableClient>,
        policy: AcceptPolicy,
        staleness: chrono::Duration,
    ) -> Self {
        let store = Arc::new(EntityStore::new());
        let sync = Arc::new(SyncService::new(store.clone(), remote, staleness));
        let lifecycle = LifecycleService::new(store.clone(), sync.clone(), policy);
        Self {
            store,
            sync,
            lifecycle,
        }
    }

    /// Derived job list for display; served from the local cache.
    pub fn jobs_view(&self, filter: &JobFilter, sort: JobSort) -> Vec<Job> {
        derive_job_list(&self.store.jobs(), filter, sort)
    }

    /// Derived freelancer list for display; served from the local cache.
    pub fn freelancers_view(&self, filter: &FreelancerFilter, sort: FreelancerSort) -> Vec<User> {
        derive_freelancer_list(&self.store.users(), filter, sort)
    }
}
