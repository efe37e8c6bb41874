use std::sync::Arc;

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dto::job_dto::{CreateJobPayload, UpdateJobPayload};
use crate::dto::proposal_dto::SubmitProposalPayload;
use crate::error::{Error, Result};
use crate::models::contract::Contract;
use crate::models::job::{Job, JobStatus};
use crate::models::milestone::Milestone;
use crate::models::proposal::{Proposal, ProposalStatus};
use crate::models::user::User;
use crate::remote::{ListQuery, TableClient};
use crate::store::{EntityKind, EntityStore};
use crate::utils::time;

/// Propagates local mutations to the persistence boundary and reconciles
/// the results.
///
/// Every write follows the same sequence: apply optimistically to the
/// store, dispatch the remote call, then either fold server-assigned fields
/// back into the *current* local record or roll back to the pre-mutation
/// snapshot and surface the failure.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<EntityStore>,
    remote: Arc<dyn TableClient>,
    staleness: Duration,
}

pub fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "users",
        EntityKind::Job => "jobs",
        EntityKind::Proposal => "proposals",
        EntityKind::Contract => "contracts",
        EntityKind::Milestone => "milestones",
        EntityKind::Payment => "payments",
    }
}

impl SyncService {
    pub fn new(store: Arc<EntityStore>, remote: Arc<dyn TableClient>, staleness: Duration) -> Self {
        Self {
            store,
            remote,
            staleness,
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Creates a job under a client-temporary id, then re-keys the entry
    /// under the server-assigned id once the insert is acknowledged. The
    /// temporary entry never survives: it is replaced on success and removed
    /// on failure.
    pub async fn create_job(&self, payload: CreateJobPayload) -> Result<Job> {
        use validator::Validate;
        payload.validate()?;

        let temp_id = Uuid::new_v4();
        let job = Job {
            id: temp_id,
            client_id: payload.client_id,
            title: payload.title,
            description: payload.description,
            skills: payload.skills,
            category: payload.category,
            budget: payload.budget,
            pricing: payload.pricing,
            duration: payload.duration,
            status: JobStatus::Open,
            location: payload.location,
            created_at: time::now(),
            proposal_count: 0,
            expires_at: payload.expires_at,
        };

        let mut tx = self.store.write();
        tx.insert_job(job.clone());
        tx.commit();

        match self.insert_row(EntityKind::Job, &job).await {
            Ok(server_job) => {
                let mut tx = self.store.write();
                tx.remove_job(temp_id)?;
                let id = server_job.id;
                tx.insert_job(server_job.clone());
                tx.mark_synced(EntityKind::Job, id, time::now());
                tx.commit();
                info!(job_id = %id, "Job created");
                Ok(server_job)
            }
            Err(err) => {
                let mut tx = self.store.write();
                tx.remove_job(temp_id)?;
                tx.commit();
                Err(err)
            }
        }
    }

    pub async fn update_job(&self, id: Uuid, payload: UpdateJobPayload) -> Result<Job> {
        use validator::Validate;
        payload.validate()?;

        let snapshot = self.store.job(id)?;

        let mut tx = self.store.write();
        let updated = tx.update_job(id, |job| {
            if let Some(title) = payload.title.clone() {
                job.title = title;
            }
            if let Some(description) = payload.description.clone() {
                job.description = description;
            }
            if let Some(skills) = payload.skills.clone() {
                job.skills = skills;
            }
            if let Some(category) = payload.category.clone() {
                job.category = category;
            }
            if let Some(budget) = payload.budget {
                job.budget = budget;
            }
            if let Some(duration) = payload.duration.clone() {
                job.duration = Some(duration);
            }
            if let Some(expires_at) = payload.expires_at {
                job.expires_at = Some(expires_at);
            }
        })?;
        tx.commit();

        let patch = serde_json::to_value(&payload)?;
        match self.push_update(EntityKind::Job, id, patch).await {
            Ok(()) => Ok(updated),
            Err(err) => {
                let mut tx = self.store.write();
                tx.update_job(id, |job| *job = snapshot)?;
                tx.commit();
                Err(err)
            }
        }
    }

    /// Submitting a proposal also bumps the parent job's proposal count;
    /// both changes roll back together if the remote write fails.
    pub async fn submit_proposal(&self, payload: SubmitProposalPayload) -> Result<Proposal> {
        use validator::Validate;
        payload.validate()?;

        let job = self.store.job(payload.job_id)?;
        if job.status != JobStatus::Open {
            return Err(Error::BadRequest(format!(
                "Job {} is not open for proposals",
                job.id
            )));
        }

        let temp_id = Uuid::new_v4();
        let proposal = Proposal {
            id: temp_id,
            job_id: payload.job_id,
            freelancer_id: payload.freelancer_id,
            cover_letter: payload.cover_letter,
            bid: payload.bid,
            estimated_duration: payload.estimated_duration,
            status: ProposalStatus::Pending,
            created_at: time::now(),
        };

        let mut tx = self.store.write();
        tx.insert_proposal(proposal.clone());
        tx.update_job(payload.job_id, |job| job.proposal_count += 1)?;
        tx.commit();

        match self.insert_row(EntityKind::Proposal, &proposal).await {
            Ok(server_proposal) => {
                let mut tx = self.store.write();
                tx.remove_proposal(temp_id)?;
                let id = server_proposal.id;
                tx.insert_proposal(server_proposal.clone());
                tx.mark_synced(EntityKind::Proposal, id, time::now());
                tx.commit();
                Ok(server_proposal)
            }
            Err(err) => {
                let mut tx = self.store.write();
                tx.remove_proposal(temp_id)?;
                tx.update_job(payload.job_id, |job| job.proposal_count -= 1)?;
                tx.commit();
                Err(err)
            }
        }
    }

    /// Inserts an entity, returning the server's version of the row
    /// (server-assigned id and created_at included).
    pub async fn insert_row<T>(&self, kind: EntityKind, entity: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut row = serde_json::to_value(entity)?;
        if let Some(object) = row.as_object_mut() {
            // Server-assigned fields; the local values are placeholders.
            object.remove("id");
            object.remove("created_at");
        }
        let stored = self.remote.insert(table_for(kind), row).await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Dispatches a partial update for an already-applied local mutation and
    /// stamps the entity as synced. The caller owns rollback on failure.
    pub async fn push_update(&self, kind: EntityKind, id: Uuid, patch: JsonValue) -> Result<()> {
        self.remote.update(table_for(kind), id, patch).await?;
        let mut tx = self.store.write();
        tx.mark_synced(kind, id, time::now());
        tx.commit();
        Ok(())
    }

    /// Re-fetches the authoritative record when the local copy is older
    /// than the staleness threshold. Used by lifecycle guards, which must
    /// not trust a stale cache entry.
    pub async fn ensure_fresh_job(&self, id: Uuid) -> Result<()> {
        if !self.store.is_stale(EntityKind::Job, id, self.staleness, time::now()) {
            return Ok(());
        }
        let row = self
            .remote
            .get(table_for(EntityKind::Job), id)
            .await?
            .ok_or_else(|| Error::not_found("job", id))?;
        let fresh: Job = serde_json::from_value(row)?;
        let mut tx = self.store.write();
        match tx.update_job(id, |job| *job = fresh.clone()) {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => tx.insert_job(fresh),
            Err(err) => return Err(err),
        }
        tx.mark_synced(EntityKind::Job, id, time::now());
        tx.commit();
        Ok(())
    }

    pub async fn ensure_fresh_proposal(&self, id: Uuid) -> Result<()> {
        if !self
            .store
            .is_stale(EntityKind::Proposal, id, self.staleness, time::now())
        {
            return Ok(());
        }
        let row = self
            .remote
            .get(table_for(EntityKind::Proposal), id)
            .await?
            .ok_or_else(|| Error::not_found("proposal", id))?;
        let fresh: Proposal = serde_json::from_value(row)?;
        let mut tx = self.store.write();
        match tx.update_proposal(id, |proposal| *proposal = fresh.clone()) {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => tx.insert_proposal(fresh),
            Err(err) => return Err(err),
        }
        tx.mark_synced(EntityKind::Proposal, id, time::now());
        tx.commit();
        Ok(())
    }

    pub async fn ensure_fresh_milestone(&self, id: Uuid) -> Result<()> {
        if !self
            .store
            .is_stale(EntityKind::Milestone, id, self.staleness, time::now())
        {
            return Ok(());
        }
        let row = self
            .remote
            .get(table_for(EntityKind::Milestone), id)
            .await?
            .ok_or_else(|| Error::not_found("milestone", id))?;
        let fresh: Milestone = serde_json::from_value(row)?;
        let mut tx = self.store.write();
        match tx.update_milestone(id, |milestone| *milestone = fresh.clone()) {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => tx.insert_milestone(fresh),
            Err(err) => return Err(err),
        }
        tx.mark_synced(EntityKind::Milestone, id, time::now());
        tx.commit();
        Ok(())
    }

    pub async fn ensure_fresh_contract(&self, id: Uuid) -> Result<()> {
        if !self
            .store
            .is_stale(EntityKind::Contract, id, self.staleness, time::now())
        {
            return Ok(());
        }
        let row = self
            .remote
            .get(table_for(EntityKind::Contract), id)
            .await?
            .ok_or_else(|| Error::not_found("contract", id))?;
        let fresh: Contract = serde_json::from_value(row)?;
        let mut tx = self.store.write();
        match tx.update_contract(id, |contract| *contract = fresh.clone()) {
            Ok(_) => {}
            Err(Error::NotFound { .. }) => tx.insert_contract(fresh),
            Err(err) => return Err(err),
        }
        tx.mark_synced(EntityKind::Contract, id, time::now());
        tx.commit();
        Ok(())
    }

    /// Pulls the full job collection. List views tolerate staleness, so
    /// this runs in the background rather than blocking reads.
    pub async fn refresh_jobs(&self) -> Result<usize> {
        let rows = self
            .remote
            .list(table_for(EntityKind::Job), &ListQuery::default())
            .await?;
        let count = rows.len();
        let mut tx = self.store.write();
        for row in rows {
            let job: Job = match serde_json::from_value(row) {
                Ok(job) => job,
                Err(err) => {
                    warn!(error = %err, "Skipping malformed job row");
                    continue;
                }
            };
            let id = job.id;
            match tx.update_job(id, |current| *current = job.clone()) {
                Ok(_) => {}
                Err(Error::NotFound { .. }) => tx.insert_job(job),
                Err(err) => return Err(err),
            }
            tx.mark_synced(EntityKind::Job, id, time::now());
        }
        tx.commit();
        Ok(count)
    }

    pub async fn refresh_users(&self) -> Result<usize> {
        let rows = self
            .remote
            .list(table_for(EntityKind::User), &ListQuery::default())
            .await?;
        let count = rows.len();
        let mut tx = self.store.write();
        for row in rows {
            let user: User = match serde_json::from_value(row) {
                Ok(user) => user,
                Err(err) => {
                    warn!(error = %err, "Skipping malformed user row");
                    continue;
                }
            };
            let id = user.id;
            tx.insert_user(user);
            tx.mark_synced(EntityKind::User, id, time::now());
        }
        tx.commit();
        Ok(count)
    }

    /// Lists open jobs straight from the remote, with the status predicate
    /// pushed down.
    pub async fn fetch_open_jobs(&self) -> Result<Vec<Job>> {
        let query = ListQuery::default().eq("status", json!("open"));
        let rows = self.remote.list(table_for(EntityKind::Job), &query).await?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(row)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{BudgetRange, PricingType, WorkLocation};
    use crate::remote::table::MockTableClient;
    use rust_decimal::Decimal;

    fn sample_job(id: Uuid) -> Job {
        Job {
            id,
            client_id: Uuid::new_v4(),
            title: "Test job".to_string(),
            description: "Description".to_string(),
            skills: vec![],
            category: "Testing".to_string(),
            budget: BudgetRange {
                min: Decimal::from(10),
                max: Decimal::from(20),
            },
            pricing: PricingType::Fixed,
            duration: None,
            status: JobStatus::Open,
            location: WorkLocation::Remote,
            created_at: time::now(),
            proposal_count: 0,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn a_fresh_entity_is_not_refetched() {
        let mut remote = MockTableClient::new();
        remote.expect_get().times(0);

        let store = Arc::new(EntityStore::new());
        let id = Uuid::new_v4();
        let mut tx = store.write();
        tx.insert_job(sample_job(id));
        tx.mark_synced(EntityKind::Job, id, time::now());
        tx.commit();

        let sync = SyncService::new(store, Arc::new(remote), Duration::seconds(300));
        sync.ensure_fresh_job(id).await.unwrap();
    }

    #[tokio::test]
    async fn a_stale_entity_is_replaced_by_the_remote_record() {
        let id = Uuid::new_v4();
        let mut fresh = sample_job(id);
        fresh.title = "Server truth".to_string();
        let row = serde_json::to_value(&fresh).unwrap();

        let mut remote = MockTableClient::new();
        remote
            .expect_get()
            .times(1)
            .returning(move |_, _| Ok(Some(row.clone())));

        let store = Arc::new(EntityStore::new());
        let mut tx = store.write();
        tx.insert_job(sample_job(id));
        tx.commit();

        // Never synced, so any threshold treats it as stale.
        let sync = SyncService::new(store.clone(), Arc::new(remote), Duration::seconds(300));
        sync.ensure_fresh_job(id).await.unwrap();
        assert_eq!(store.job(id).unwrap().title, "Server truth");
    }

    #[tokio::test]
    async fn a_tripped_deadline_rolls_back_and_reports_timed_out() {
        let mut remote = MockTableClient::new();
        remote
            .expect_insert()
            .times(1)
            .returning(|_, _| Err(Error::TimedOut(std::time::Duration::from_secs(5))));

        let store = Arc::new(EntityStore::new());
        let sync = SyncService::new(store.clone(), Arc::new(remote), Duration::seconds(300));

        let payload = CreateJobPayload {
            client_id: Uuid::new_v4(),
            title: "Slow job".to_string(),
            description: "Description".to_string(),
            skills: vec![],
            category: "Testing".to_string(),
            budget: BudgetRange {
                min: Decimal::from(10),
                max: Decimal::from(20),
            },
            pricing: PricingType::Fixed,
            duration: None,
            location: WorkLocation::Remote,
            expires_at: None,
        };
        let err = sync.create_job(payload).await.unwrap_err();

        // A deadline trip is its own failure class, not a server rejection,
        // and the optimistic insert is gone.
        assert!(matches!(err, Error::TimedOut(_)));
        assert!(err.is_retryable());
        assert!(store.jobs().is_empty());
    }

    #[tokio::test]
    async fn push_update_failures_are_surfaced_as_retryable() {
        let mut remote = MockTableClient::new();
        remote
            .expect_update()
            .times(1)
            .returning(|_, _, _| Err(Error::RemoteSync("boom".to_string())));

        let store = Arc::new(EntityStore::new());
        let sync = SyncService::new(store, Arc::new(remote), Duration::seconds(300));
        let err = sync
            .push_update(EntityKind::Job, Uuid::new_v4(), json!({"status": "open"}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
