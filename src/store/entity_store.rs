use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::contract::Contract;
use crate::models::job::Job;
use crate::models::milestone::Milestone;
use crate::models::payment::Payment;
use crate::models::proposal::Proposal;
use crate::models::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Job,
    Proposal,
    Contract,
    Milestone,
    Payment,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Job => "job",
            EntityKind::Proposal => "proposal",
            EntityKind::Contract => "contract",
            EntityKind::Milestone => "milestone",
            EntityKind::Payment => "payment",
        }
    }
}

/// One event per committed transaction. A multi-entity commit (e.g. milestone
/// release plus payment completion) is pushed as a single event, so
/// subscribers never observe one half of it.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub changes: Vec<(EntityKind, Uuid)>,
}

#[derive(Debug, Clone)]
struct Stored<T> {
    entity: T,
    /// Insertion sequence, used as the stable tie-break for `newest`.
    seq: u64,
    /// When the entity last matched the remote record. `None` for entities
    /// created locally and not yet reconciled.
    synced_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    users: HashMap<Uuid, Stored<User>>,
    jobs: HashMap<Uuid, Stored<Job>>,
    proposals: HashMap<Uuid, Stored<Proposal>>,
    contracts: HashMap<Uuid, Stored<Contract>>,
    milestones: HashMap<Uuid, Stored<Milestone>>,
    payments: HashMap<Uuid, Stored<Payment>>,

    // Secondary indexes, maintained on every mutation.
    proposals_by_job: HashMap<Uuid, Vec<Uuid>>,
    contract_by_job: HashMap<Uuid, Uuid>,
    milestones_by_contract: HashMap<Uuid, Vec<Uuid>>,
    payments_by_contract: HashMap<Uuid, Vec<Uuid>>,
    payment_by_milestone: HashMap<Uuid, Uuid>,
}

impl Inner {
    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Single source of truth for all fetched and locally created entities.
///
/// All writes go through a [`StoreTx`] obtained from [`EntityStore::write`];
/// the transaction holds the store lock until commit, so concurrent
/// completions of in-flight remote calls serialize and each mutation sees
/// the entity's current value at apply time.
pub struct EntityStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn write(&self) -> StoreTx<'_> {
        StoreTx {
            guard: lock(&self.inner),
            events: &self.events,
            changes: Vec::new(),
        }
    }

    // Reads return owned clones; callers never hold references into the
    // store across an await point.

    pub fn user(&self, id: Uuid) -> Result<User> {
        let inner = lock(&self.inner);
        inner
            .users
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("user", id))
    }

    pub fn users(&self) -> Vec<User> {
        collect_ordered(&lock(&self.inner).users)
    }

    pub fn job(&self, id: Uuid) -> Result<Job> {
        let inner = lock(&self.inner);
        inner
            .jobs
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("job", id))
    }

    pub fn jobs(&self) -> Vec<Job> {
        collect_ordered(&lock(&self.inner).jobs)
    }

    pub fn proposal(&self, id: Uuid) -> Result<Proposal> {
        let inner = lock(&self.inner);
        inner
            .proposals
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("proposal", id))
    }

    pub fn proposals_for_job(&self, job_id: Uuid) -> Vec<Proposal> {
        let inner = lock(&self.inner);
        inner
            .proposals_by_job
            .get(&job_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.proposals.get(id))
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn contract(&self, id: Uuid) -> Result<Contract> {
        let inner = lock(&self.inner);
        inner
            .contracts
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("contract", id))
    }

    pub fn contract_for_job(&self, job_id: Uuid) -> Option<Contract> {
        let inner = lock(&self.inner);
        inner
            .contract_by_job
            .get(&job_id)
            .and_then(|id| inner.contracts.get(id))
            .map(|s| s.entity.clone())
    }

    pub fn milestone(&self, id: Uuid) -> Result<Milestone> {
        let inner = lock(&self.inner);
        inner
            .milestones
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("milestone", id))
    }

    /// Milestones in negotiation order (the order they were added).
    pub fn milestones_for_contract(&self, contract_id: Uuid) -> Vec<Milestone> {
        let inner = lock(&self.inner);
        inner
            .milestones_by_contract
            .get(&contract_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.milestones.get(id))
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn payment(&self, id: Uuid) -> Result<Payment> {
        let inner = lock(&self.inner);
        inner
            .payments
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("payment", id))
    }

    pub fn payments_for_contract(&self, contract_id: Uuid) -> Vec<Payment> {
        let inner = lock(&self.inner);
        inner
            .payments_by_contract
            .get(&contract_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.payments.get(id))
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn payment_for_milestone(&self, milestone_id: Uuid) -> Option<Payment> {
        let inner = lock(&self.inner);
        inner
            .payment_by_milestone
            .get(&milestone_id)
            .and_then(|id| inner.payments.get(id))
            .map(|s| s.entity.clone())
    }

    pub fn synced_at(&self, kind: EntityKind, id: Uuid) -> Option<DateTime<Utc>> {
        let inner = lock(&self.inner);
        match kind {
            EntityKind::User => inner.users.get(&id).and_then(|s| s.synced_at),
            EntityKind::Job => inner.jobs.get(&id).and_then(|s| s.synced_at),
            EntityKind::Proposal => inner.proposals.get(&id).and_then(|s| s.synced_at),
            EntityKind::Contract => inner.contracts.get(&id).and_then(|s| s.synced_at),
            EntityKind::Milestone => inner.milestones.get(&id).and_then(|s| s.synced_at),
            EntityKind::Payment => inner.payments.get(&id).and_then(|s| s.synced_at),
        }
    }

    /// True when the local copy is older than `threshold` (or was never
    /// reconciled with the remote at all).
    pub fn is_stale(&self, kind: EntityKind, id: Uuid, threshold: Duration, now: DateTime<Utc>) -> bool {
        match self.synced_at(kind, id) {
            Some(at) => now - at > threshold,
            None => true,
        }
    }
}

/// A write transaction over the store. Holds the store lock; all mutations
/// apply in place and are announced to subscribers as one event on
/// [`StoreTx::commit`].
pub struct StoreTx<'a> {
    guard: MutexGuard<'a, Inner>,
    events: &'a broadcast::Sender<StoreEvent>,
    changes: Vec<(EntityKind, Uuid)>,
}

impl StoreTx<'_> {
    pub fn commit(self) {
        if !self.changes.is_empty() {
            // No receivers is fine; the event is simply dropped.
            let _ = self.events.send(StoreEvent {
                changes: self.changes,
            });
        }
    }

    fn touched(&mut self, kind: EntityKind, id: Uuid) {
        self.changes.push((kind, id));
    }

    // Guard reads: the lifecycle controller validates and mutates under the
    // same lock acquisition, so its guards cannot race a concurrent commit.

    pub fn job(&self, id: Uuid) -> Result<Job> {
        self.guard
            .jobs
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("job", id))
    }

    pub fn proposal(&self, id: Uuid) -> Result<Proposal> {
        self.guard
            .proposals
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("proposal", id))
    }

    pub fn proposals_for_job(&self, job_id: Uuid) -> Vec<Proposal> {
        self.guard
            .proposals_by_job
            .get(&job_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.guard.proposals.get(id))
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn contract(&self, id: Uuid) -> Result<Contract> {
        self.guard
            .contracts
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("contract", id))
    }

    pub fn milestone(&self, id: Uuid) -> Result<Milestone> {
        self.guard
            .milestones
            .get(&id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| Error::not_found("milestone", id))
    }

    pub fn milestones_for_contract(&self, contract_id: Uuid) -> Vec<Milestone> {
        self.guard
            .milestones_by_contract
            .get(&contract_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.guard.milestones.get(id))
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn payment_for_milestone(&self, milestone_id: Uuid) -> Option<Payment> {
        self.guard
            .payment_by_milestone
            .get(&milestone_id)
            .and_then(|id| self.guard.payments.get(id))
            .map(|s| s.entity.clone())
    }

    pub fn insert_user(&mut self, user: User) {
        let id = user.id;
        let seq = self.guard.take_seq();
        self.guard.users.insert(
            id,
            Stored {
                entity: user,
                seq,
                synced_at: None,
            },
        );
        self.touched(EntityKind::User, id);
    }

    pub fn insert_job(&mut self, job: Job) {
        let id = job.id;
        let seq = self.guard.take_seq();
        self.guard.jobs.insert(
            id,
            Stored {
                entity: job,
                seq,
                synced_at: None,
            },
        );
        self.touched(EntityKind::Job, id);
    }

    pub fn update_job(&mut self, id: Uuid, f: impl FnOnce(&mut Job)) -> Result<Job> {
        let stored = self
            .guard
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("job", id))?;
        f(&mut stored.entity);
        let updated = stored.entity.clone();
        self.touched(EntityKind::Job, id);
        Ok(updated)
    }

    /// Removes a job entry. Used when a locally created job is re-keyed
    /// under its server-assigned id, and on rollback of a failed create.
    pub fn remove_job(&mut self, id: Uuid) -> Result<Job> {
        let stored = self
            .guard
            .jobs
            .remove(&id)
            .ok_or_else(|| Error::not_found("job", id))?;
        self.guard.proposals_by_job.remove(&id);
        self.guard.contract_by_job.remove(&id);
        self.touched(EntityKind::Job, id);
        Ok(stored.entity)
    }

    pub fn insert_proposal(&mut self, proposal: Proposal) {
        let id = proposal.id;
        let job_id = proposal.job_id;
        let seq = self.guard.take_seq();
        self.guard.proposals.insert(
            id,
            Stored {
                entity: proposal,
                seq,
                synced_at: None,
            },
        );
        self.guard.proposals_by_job.entry(job_id).or_default().push(id);
        self.touched(EntityKind::Proposal, id);
    }

    pub fn remove_proposal(&mut self, id: Uuid) -> Result<Proposal> {
        let stored = self
            .guard
            .proposals
            .remove(&id)
            .ok_or_else(|| Error::not_found("proposal", id))?;
        if let Some(ids) = self.guard.proposals_by_job.get_mut(&stored.entity.job_id) {
            ids.retain(|pid| *pid != id);
        }
        self.touched(EntityKind::Proposal, id);
        Ok(stored.entity)
    }

    pub fn update_proposal(&mut self, id: Uuid, f: impl FnOnce(&mut Proposal)) -> Result<Proposal> {
        let stored = self
            .guard
            .proposals
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("proposal", id))?;
        f(&mut stored.entity);
        let updated = stored.entity.clone();
        self.touched(EntityKind::Proposal, id);
        Ok(updated)
    }

    pub fn insert_contract(&mut self, contract: Contract) {
        let id = contract.id;
        let job_id = contract.job_id;
        let seq = self.guard.take_seq();
        self.guard.contracts.insert(
            id,
            Stored {
                entity: contract,
                seq,
                synced_at: None,
            },
        );
        self.guard.contract_by_job.insert(job_id, id);
        self.touched(EntityKind::Contract, id);
    }

    pub fn remove_contract(&mut self, id: Uuid) -> Result<Contract> {
        let stored = self
            .guard
            .contracts
            .remove(&id)
            .ok_or_else(|| Error::not_found("contract", id))?;
        self.guard.contract_by_job.remove(&stored.entity.job_id);
        self.guard.milestones_by_contract.remove(&id);
        self.guard.payments_by_contract.remove(&id);
        self.touched(EntityKind::Contract, id);
        Ok(stored.entity)
    }

    pub fn update_contract(&mut self, id: Uuid, f: impl FnOnce(&mut Contract)) -> Result<Contract> {
        let stored = self
            .guard
            .contracts
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("contract", id))?;
        f(&mut stored.entity);
        let updated = stored.entity.clone();
        self.touched(EntityKind::Contract, id);
        Ok(updated)
    }

    pub fn insert_milestone(&mut self, milestone: Milestone) {
        let id = milestone.id;
        let contract_id = milestone.contract_id;
        let seq = self.guard.take_seq();
        self.guard.milestones.insert(
            id,
            Stored {
                entity: milestone,
                seq,
                synced_at: None,
            },
        );
        self.guard
            .milestones_by_contract
            .entry(contract_id)
            .or_default()
            .push(id);
        self.touched(EntityKind::Milestone, id);
    }

    pub fn remove_milestone(&mut self, id: Uuid) -> Result<Milestone> {
        let stored = self
            .guard
            .milestones
            .remove(&id)
            .ok_or_else(|| Error::not_found("milestone", id))?;
        if let Some(ids) = self
            .guard
            .milestones_by_contract
            .get_mut(&stored.entity.contract_id)
        {
            ids.retain(|mid| *mid != id);
        }
        self.guard.payment_by_milestone.remove(&id);
        self.touched(EntityKind::Milestone, id);
        Ok(stored.entity)
    }

    pub fn update_milestone(&mut self, id: Uuid, f: impl FnOnce(&mut Milestone)) -> Result<Milestone> {
        let stored = self
            .guard
            .milestones
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("milestone", id))?;
        f(&mut stored.entity);
        let updated = stored.entity.clone();
        self.touched(EntityKind::Milestone, id);
        Ok(updated)
    }

    pub fn insert_payment(&mut self, payment: Payment) {
        let id = payment.id;
        let contract_id = payment.contract_id;
        let milestone_id = payment.milestone_id;
        let seq = self.guard.take_seq();
        self.guard.payments.insert(
            id,
            Stored {
                entity: payment,
                seq,
                synced_at: None,
            },
        );
        self.guard
            .payments_by_contract
            .entry(contract_id)
            .or_default()
            .push(id);
        if let Some(milestone_id) = milestone_id {
            self.guard.payment_by_milestone.insert(milestone_id, id);
        }
        self.touched(EntityKind::Payment, id);
    }

    pub fn remove_payment(&mut self, id: Uuid) -> Result<Payment> {
        let stored = self
            .guard
            .payments
            .remove(&id)
            .ok_or_else(|| Error::not_found("payment", id))?;
        if let Some(ids) = self
            .guard
            .payments_by_contract
            .get_mut(&stored.entity.contract_id)
        {
            ids.retain(|pid| *pid != id);
        }
        if let Some(milestone_id) = stored.entity.milestone_id {
            self.guard.payment_by_milestone.remove(&milestone_id);
        }
        self.touched(EntityKind::Payment, id);
        Ok(stored.entity)
    }

    pub fn update_payment(&mut self, id: Uuid, f: impl FnOnce(&mut Payment)) -> Result<Payment> {
        let stored = self
            .guard
            .payments
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("payment", id))?;
        f(&mut stored.entity);
        let updated = stored.entity.clone();
        self.touched(EntityKind::Payment, id);
        Ok(updated)
    }

    pub fn mark_synced(&mut self, kind: EntityKind, id: Uuid, at: DateTime<Utc>) {
        let inner = &mut *self.guard;
        let slot = match kind {
            EntityKind::User => inner.users.get_mut(&id).map(|s| &mut s.synced_at),
            EntityKind::Job => inner.jobs.get_mut(&id).map(|s| &mut s.synced_at),
            EntityKind::Proposal => inner.proposals.get_mut(&id).map(|s| &mut s.synced_at),
            EntityKind::Contract => inner.contracts.get_mut(&id).map(|s| &mut s.synced_at),
            EntityKind::Milestone => inner.milestones.get_mut(&id).map(|s| &mut s.synced_at),
            EntityKind::Payment => inner.payments.get_mut(&id).map(|s| &mut s.synced_at),
        };
        if let Some(slot) = slot {
            *slot = Some(at);
        }
    }
}

fn lock<'a>(inner: &'a Mutex<Inner>) -> MutexGuard<'a, Inner> {
    // A poisoned lock only means another thread panicked mid-write; the
    // data itself is still coherent because mutations are applied in full.
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

fn collect_ordered<T: Clone>(map: &HashMap<Uuid, Stored<T>>) -> Vec<T> {
    let mut entries: Vec<&Stored<T>> = map.values().collect();
    entries.sort_by_key(|s| s.seq);
    entries.into_iter().map(|s| s.entity.clone()).collect()
}
