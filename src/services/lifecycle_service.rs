use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::dto::milestone_dto::CreateMilestonePayload;
use crate::error::{Error, Result};
use crate::models::contract::{Contract, ContractStatus};
use crate::models::job::{Job, JobStatus};
use crate::models::milestone::{Milestone, MilestoneStatus};
use crate::models::payment::{Payment, PaymentMethod, PaymentStatus};
use crate::models::proposal::{Proposal, ProposalStatus};
use crate::services::sync_service::SyncService;
use crate::store::{EntityKind, EntityStore};
use crate::utils::time;

/// What happens to the other pending proposals on a job when one is
/// accepted. The marketplace tolerates either reading; both are supported
/// and the choice is injected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptPolicy {
    RejectSiblings,
    LeaveSiblings,
}

/// A requested status change, dispatched through
/// [`LifecycleService::invoke`].
#[derive(Debug, Clone)]
pub enum Transition {
    AcceptProposal { terms: String },
    RejectProposal,
    WithdrawProposal,
    StartMilestone,
    SubmitMilestone,
    ApproveMilestone,
    ReleaseMilestone,
    RejectMilestone,
    CompleteContract,
    CancelContract,
    CancelJob,
}

/// Pre-mutation copies captured before a transition is applied, restored
/// verbatim if the remote write fails.
enum Snapshot {
    Job(Job),
    Proposal(Proposal),
    Contract(Contract),
    Milestone(Milestone),
    Payment(Payment),
}

/// Enforces legal state transitions for proposals, contracts and
/// milestones, and the payment side effects of milestone approval and
/// release.
///
/// This service is the only component that mutates status fields. Guards
/// run against the store under the same lock as the mutation, so a guard
/// can never pass against one value and apply against another. Remote
/// persistence follows the optimistic-update contract of [`SyncService`]:
/// on a failed dispatch every local change of the transition is rolled
/// back before the error is surfaced.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<EntityStore>,
    sync: Arc<SyncService>,
    policy: AcceptPolicy,
}

fn invalid(
    entity: &'static str,
    from: &'static str,
    to: &'static str,
    guard: impl Into<String>,
) -> Error {
    Error::InvalidTransition {
        entity,
        from,
        to,
        guard: guard.into(),
    }
}

impl LifecycleService {
    pub fn new(store: Arc<EntityStore>, sync: Arc<SyncService>, policy: AcceptPolicy) -> Self {
        Self {
            store,
            sync,
            policy,
        }
    }

    pub async fn invoke(&self, id: Uuid, transition: Transition) -> Result<()> {
        match transition {
            Transition::AcceptProposal { terms } => {
                self.accept_proposal(id, terms).await?;
            }
            Transition::RejectProposal => {
                self.reject_proposal(id).await?;
            }
            Transition::WithdrawProposal => {
                self.withdraw_proposal(id).await?;
            }
            Transition::StartMilestone => {
                self.start_milestone(id).await?;
            }
            Transition::SubmitMilestone => {
                self.submit_milestone(id).await?;
            }
            Transition::ApproveMilestone => {
                self.approve_milestone(id).await?;
            }
            Transition::ReleaseMilestone => {
                self.release_milestone(id).await?;
            }
            Transition::RejectMilestone => {
                self.reject_milestone(id).await?;
            }
            Transition::CompleteContract => {
                self.complete_contract(id).await?;
            }
            Transition::CancelContract => {
                self.cancel_contract(id).await?;
            }
            Transition::CancelJob => {
                self.cancel_job(id).await?;
            }
        }
        Ok(())
    }

    /// Accepts a pending proposal on an open job: the job moves to
    /// in-progress, siblings are handled per policy, and a new active
    /// contract is created with no milestones (milestones are added by
    /// negotiation afterwards).
    pub async fn accept_proposal(&self, proposal_id: Uuid, terms: String) -> Result<Contract> {
        self.sync.ensure_fresh_proposal(proposal_id).await?;
        let job_id = self.store.proposal(proposal_id)?.job_id;
        self.sync.ensure_fresh_job(job_id).await?;

        let temp_contract_id = Uuid::new_v4();
        let mut snapshots = Vec::new();
        let mut rejected_siblings = Vec::new();

        let contract = {
            let mut tx = self.store.write();
            let proposal = tx.proposal(proposal_id)?;
            if !proposal.status.can_transition_to(ProposalStatus::Accepted) {
                return Err(invalid(
                    "proposal",
                    proposal.status.as_str(),
                    "accepted",
                    "only a pending proposal can be accepted",
                ));
            }
            let job = tx.job(proposal.job_id).map_err(|_| {
                Error::ReferenceIntegrity(format!(
                    "Proposal {} references missing job {}",
                    proposal_id, proposal.job_id
                ))
            })?;
            if job.status != JobStatus::Open {
                return Err(invalid(
                    "proposal",
                    proposal.status.as_str(),
                    "accepted",
                    format!("parent job is {}, not open", job.status.as_str()),
                ));
            }

            snapshots.push(Snapshot::Proposal(proposal.clone()));
            snapshots.push(Snapshot::Job(job.clone()));

            tx.update_proposal(proposal_id, |p| p.status = ProposalStatus::Accepted)?;
            tx.update_job(job.id, |j| j.status = JobStatus::InProgress)?;

            if self.policy == AcceptPolicy::RejectSiblings {
                for sibling in tx.proposals_for_job(job.id) {
                    if sibling.id != proposal_id && sibling.status == ProposalStatus::Pending {
                        snapshots.push(Snapshot::Proposal(sibling.clone()));
                        tx.update_proposal(sibling.id, |p| p.status = ProposalStatus::Rejected)?;
                        rejected_siblings.push(sibling.id);
                    }
                }
            }

            let contract = Contract {
                id: temp_contract_id,
                job_id: job.id,
                client_id: job.client_id,
                freelancer_id: proposal.freelancer_id,
                proposal_id,
                terms,
                status: ContractStatus::Active,
                started_at: time::now(),
                ended_at: None,
            };
            tx.insert_contract(contract.clone());
            tx.commit();
            contract
        };

        let result = self
            .persist_acceptance(&contract, proposal_id, job_id, &rejected_siblings)
            .await;
        match result {
            Ok(server_contract) => {
                info!(
                    proposal_id = %proposal_id,
                    contract_id = %server_contract.id,
                    "Proposal accepted"
                );
                Ok(server_contract)
            }
            Err(err) => {
                self.rollback(snapshots, &[(EntityKind::Contract, temp_contract_id)]);
                Err(err)
            }
        }
    }

    async fn persist_acceptance(
        &self,
        contract: &Contract,
        proposal_id: Uuid,
        job_id: Uuid,
        rejected_siblings: &[Uuid],
    ) -> Result<Contract> {
        let server_contract: Contract = self.sync.insert_row(EntityKind::Contract, contract).await?;

        self.sync
            .push_update(EntityKind::Proposal, proposal_id, json!({"status": "accepted"}))
            .await?;
        self.sync
            .push_update(EntityKind::Job, job_id, json!({"status": "in-progress"}))
            .await?;
        for sibling_id in rejected_siblings {
            self.sync
                .push_update(EntityKind::Proposal, *sibling_id, json!({"status": "rejected"}))
                .await?;
        }

        // Re-key only once every remote write has landed; until then the
        // contract stays under the temporary id the caller knows how to
        // roll back.
        let mut tx = self.store.write();
        tx.remove_contract(contract.id)?;
        tx.insert_contract(server_contract.clone());
        tx.mark_synced(EntityKind::Contract, server_contract.id, time::now());
        tx.commit();

        Ok(server_contract)
    }

    pub async fn reject_proposal(&self, proposal_id: Uuid) -> Result<Proposal> {
        self.proposal_transition(proposal_id, ProposalStatus::Rejected)
            .await
    }

    pub async fn withdraw_proposal(&self, proposal_id: Uuid) -> Result<Proposal> {
        self.proposal_transition(proposal_id, ProposalStatus::Withdrawn)
            .await
    }

    async fn proposal_transition(&self, id: Uuid, target: ProposalStatus) -> Result<Proposal> {
        self.sync.ensure_fresh_proposal(id).await?;

        let snapshot;
        let updated = {
            let mut tx = self.store.write();
            let proposal = tx.proposal(id)?;
            if !proposal.status.can_transition_to(target) {
                return Err(invalid(
                    "proposal",
                    proposal.status.as_str(),
                    target.as_str(),
                    "only a pending proposal can change status",
                ));
            }
            snapshot = Snapshot::Proposal(proposal);
            let updated = tx.update_proposal(id, |p| p.status = target)?;
            tx.commit();
            updated
        };

        match self
            .sync
            .push_update(EntityKind::Proposal, id, json!({"status": target.as_str()}))
            .await
        {
            Ok(()) => Ok(updated),
            Err(err) => {
                self.rollback(vec![snapshot], &[]);
                Err(err)
            }
        }
    }

    /// Milestones are negotiated onto an active contract; the initial
    /// status is always pending.
    pub async fn add_milestone(
        &self,
        contract_id: Uuid,
        payload: CreateMilestonePayload,
    ) -> Result<Milestone> {
        payload.validate()?;

        let contract = self.store.contract(contract_id)?;
        if contract.status != ContractStatus::Active {
            return Err(invalid(
                "contract",
                contract.status.as_str(),
                "active",
                "milestones can only be added to an active contract",
            ));
        }

        let temp_id = Uuid::new_v4();
        let milestone = Milestone {
            id: temp_id,
            contract_id,
            title: payload.title,
            description: payload.description,
            amount: payload.amount,
            due_at: payload.due_at,
            status: MilestoneStatus::Pending,
            submitted_at: None,
            approved_at: None,
        };

        {
            let mut tx = self.store.write();
            tx.insert_milestone(milestone.clone());
            tx.commit();
        }

        match self.sync.insert_row(EntityKind::Milestone, &milestone).await {
            Ok(server_milestone) => {
                let mut tx = self.store.write();
                tx.remove_milestone(temp_id)?;
                let id: Uuid = server_milestone.id;
                tx.insert_milestone(server_milestone.clone());
                tx.mark_synced(EntityKind::Milestone, id, time::now());
                tx.commit();
                Ok(server_milestone)
            }
            Err(err) => {
                self.rollback(Vec::new(), &[(EntityKind::Milestone, temp_id)]);
                Err(err)
            }
        }
    }

    pub async fn start_milestone(&self, id: Uuid) -> Result<Milestone> {
        self.milestone_transition(id, MilestoneStatus::InProgress, json!({"status": "in-progress"}))
            .await
    }

    /// Freelancer hands in the deliverable; stamps the submission time.
    pub async fn submit_milestone(&self, id: Uuid) -> Result<Milestone> {
        let submitted_at = time::now();
        self.milestone_transition_with(
            id,
            MilestoneStatus::Submitted,
            json!({"status": "submitted", "submitted_at": submitted_at}),
            move |m| m.submitted_at = Some(submitted_at),
        )
        .await
    }

    /// Client rejects a submitted deliverable. Terminal: the milestone
    /// cannot be resubmitted.
    pub async fn reject_milestone(&self, id: Uuid) -> Result<Milestone> {
        self.milestone_transition(id, MilestoneStatus::Rejected, json!({"status": "rejected"}))
            .await
    }

    async fn milestone_transition(
        &self,
        id: Uuid,
        target: MilestoneStatus,
        patch: serde_json::Value,
    ) -> Result<Milestone> {
        self.milestone_transition_with(id, target, patch, |_| {}).await
    }

    async fn milestone_transition_with(
        &self,
        id: Uuid,
        target: MilestoneStatus,
        patch: serde_json::Value,
        apply: impl FnOnce(&mut Milestone),
    ) -> Result<Milestone> {
        self.sync.ensure_fresh_milestone(id).await?;

        let snapshot;
        let updated = {
            let mut tx = self.store.write();
            let milestone = tx.milestone(id)?;
            if !milestone.status.can_transition_to(target) {
                return Err(invalid(
                    "milestone",
                    milestone.status.as_str(),
                    target.as_str(),
                    format!("{} does not follow {}", target.as_str(), milestone.status.as_str()),
                ));
            }
            snapshot = Snapshot::Milestone(milestone);
            let updated = tx.update_milestone(id, |m| {
                m.status = target;
                apply(m);
            })?;
            tx.commit();
            updated
        };

        match self.sync.push_update(EntityKind::Milestone, id, patch).await {
            Ok(()) => Ok(updated),
            Err(err) => {
                self.rollback(vec![snapshot], &[]);
                Err(err)
            }
        }
    }

    /// Approving a submitted milestone stamps the approval time and creates
    /// the pending payment for exactly the milestone amount.
    pub async fn approve_milestone(&self, id: Uuid) -> Result<Payment> {
        self.sync.ensure_fresh_milestone(id).await?;

        let approved_at = time::now();
        let temp_payment_id = Uuid::new_v4();
        let mut snapshots = Vec::new();

        let payment = {
            let mut tx = self.store.write();
            let milestone = tx.milestone(id)?;
            if !milestone.status.can_transition_to(MilestoneStatus::Approved) {
                return Err(invalid(
                    "milestone",
                    milestone.status.as_str(),
                    "approved",
                    "only a submitted milestone can be approved",
                ));
            }
            let contract = tx.contract(milestone.contract_id).map_err(|_| {
                Error::ReferenceIntegrity(format!(
                    "Milestone {} references missing contract {}",
                    id, milestone.contract_id
                ))
            })?;

            snapshots.push(Snapshot::Milestone(milestone.clone()));
            tx.update_milestone(id, |m| {
                m.status = MilestoneStatus::Approved;
                m.approved_at = Some(approved_at);
            })?;

            let payment = Payment {
                id: temp_payment_id,
                contract_id: contract.id,
                milestone_id: Some(id),
                client_id: contract.client_id,
                freelancer_id: contract.freelancer_id,
                amount: milestone.amount,
                status: PaymentStatus::Pending,
                method: PaymentMethod::Escrow,
                transaction_id: None,
                created_at: time::now(),
            };
            tx.insert_payment(payment.clone());
            tx.commit();
            payment
        };

        let result: Result<Payment> = async {
            self.sync
                .push_update(
                    EntityKind::Milestone,
                    id,
                    json!({"status": "approved", "approved_at": approved_at}),
                )
                .await?;
            let server_payment: Payment =
                self.sync.insert_row(EntityKind::Payment, &payment).await?;
            let mut tx = self.store.write();
            tx.remove_payment(temp_payment_id)?;
            tx.insert_payment(server_payment.clone());
            tx.mark_synced(EntityKind::Payment, server_payment.id, time::now());
            tx.commit();
            Ok(server_payment)
        }
        .await;

        match result {
            Ok(server_payment) => {
                info!(milestone_id = %id, payment_id = %server_payment.id, "Milestone approved");
                Ok(server_payment)
            }
            Err(err) => {
                self.rollback(snapshots, &[(EntityKind::Payment, temp_payment_id)]);
                Err(err)
            }
        }
    }

    /// Releases an approved milestone. The milestone moving to released and
    /// its payment moving to completed are one logical operation: they are
    /// committed together, so no subscriber can observe one without the
    /// other.
    pub async fn release_milestone(&self, id: Uuid) -> Result<(Milestone, Payment)> {
        self.sync.ensure_fresh_milestone(id).await?;

        let mut snapshots = Vec::new();
        let (milestone, payment) = {
            let mut tx = self.store.write();
            let milestone = tx.milestone(id)?;
            if !milestone.status.can_transition_to(MilestoneStatus::Released) {
                return Err(invalid(
                    "milestone",
                    milestone.status.as_str(),
                    "released",
                    "only an approved milestone can be released",
                ));
            }
            let payment = tx.payment_for_milestone(id).ok_or_else(|| {
                Error::ReferenceIntegrity(format!("Milestone {} has no payment record", id))
            })?;
            if !payment.status.can_transition_to(PaymentStatus::Completed) {
                return Err(invalid(
                    "payment",
                    payment.status.as_str(),
                    "completed",
                    "only a pending payment can complete",
                ));
            }

            snapshots.push(Snapshot::Milestone(milestone.clone()));
            snapshots.push(Snapshot::Payment(payment.clone()));

            let milestone = tx.update_milestone(id, |m| m.status = MilestoneStatus::Released)?;
            let payment =
                tx.update_payment(payment.id, |p| p.status = PaymentStatus::Completed)?;
            tx.commit();
            (milestone, payment)
        };

        let result: Result<()> = async {
            self.sync
                .push_update(EntityKind::Milestone, id, json!({"status": "released"}))
                .await?;
            self.sync
                .push_update(EntityKind::Payment, payment.id, json!({"status": "completed"}))
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(milestone_id = %id, payment_id = %payment.id, "Milestone released");
                Ok((milestone, payment))
            }
            Err(err) => {
                self.rollback(snapshots, &[]);
                Err(err)
            }
        }
    }

    /// A contract completes only when every milestone is settled (released
    /// or rejected); the job completes with it.
    pub async fn complete_contract(&self, id: Uuid) -> Result<Contract> {
        self.sync.ensure_fresh_contract(id).await?;

        let ended_at = time::now();
        let mut snapshots = Vec::new();
        let (contract, job_id) = {
            let mut tx = self.store.write();
            let contract = tx.contract(id)?;
            if !contract.status.can_transition_to(ContractStatus::Completed) {
                return Err(invalid(
                    "contract",
                    contract.status.as_str(),
                    "completed",
                    "contract is not active",
                ));
            }
            if let Some(unsettled) = tx
                .milestones_for_contract(id)
                .iter()
                .find(|m| !m.status.is_terminal())
            {
                return Err(invalid(
                    "contract",
                    contract.status.as_str(),
                    "completed",
                    format!(
                        "milestone {} is still {}",
                        unsettled.id,
                        unsettled.status.as_str()
                    ),
                ));
            }
            let job = tx.job(contract.job_id).map_err(|_| {
                Error::ReferenceIntegrity(format!(
                    "Contract {} references missing job {}",
                    id, contract.job_id
                ))
            })?;

            snapshots.push(Snapshot::Contract(contract.clone()));
            let updated = tx.update_contract(id, |c| {
                c.status = ContractStatus::Completed;
                c.ended_at = Some(ended_at);
            })?;
            if job.status.can_transition_to(JobStatus::Completed) {
                snapshots.push(Snapshot::Job(job.clone()));
                tx.update_job(job.id, |j| j.status = JobStatus::Completed)?;
            }
            tx.commit();
            (updated, job.id)
        };

        let result: Result<()> = async {
            self.sync
                .push_update(
                    EntityKind::Contract,
                    id,
                    json!({"status": "completed", "ended_at": ended_at}),
                )
                .await?;
            self.sync
                .push_update(EntityKind::Job, job_id, json!({"status": "completed"}))
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(contract),
            Err(err) => {
                self.rollback(snapshots, &[]);
                Err(err)
            }
        }
    }

    pub async fn cancel_contract(&self, id: Uuid) -> Result<Contract> {
        self.sync.ensure_fresh_contract(id).await?;

        let ended_at = time::now();
        let mut snapshots = Vec::new();
        let (contract, job_update) = {
            let mut tx = self.store.write();
            let contract = tx.contract(id)?;
            if !contract.status.can_transition_to(ContractStatus::Cancelled) {
                return Err(invalid(
                    "contract",
                    contract.status.as_str(),
                    "cancelled",
                    "contract is not active",
                ));
            }
            snapshots.push(Snapshot::Contract(contract.clone()));
            let updated = tx.update_contract(id, |c| {
                c.status = ContractStatus::Cancelled;
                c.ended_at = Some(ended_at);
            })?;
            // The job follows unless it already reached a terminal status
            // through another path.
            let mut job_update = None;
            if let Ok(job) = tx.job(contract.job_id) {
                if job.status.can_transition_to(JobStatus::Cancelled) {
                    snapshots.push(Snapshot::Job(job.clone()));
                    tx.update_job(job.id, |j| j.status = JobStatus::Cancelled)?;
                    job_update = Some(job.id);
                }
            }
            tx.commit();
            (updated, job_update)
        };

        let result: Result<()> = async {
            self.sync
                .push_update(
                    EntityKind::Contract,
                    id,
                    json!({"status": "cancelled", "ended_at": ended_at}),
                )
                .await?;
            if let Some(job_id) = job_update {
                self.sync
                    .push_update(EntityKind::Job, job_id, json!({"status": "cancelled"}))
                    .await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(contract),
            Err(err) => {
                self.rollback(snapshots, &[]);
                Err(err)
            }
        }
    }

    pub async fn cancel_job(&self, id: Uuid) -> Result<Job> {
        self.sync.ensure_fresh_job(id).await?;

        let snapshot;
        let updated = {
            let mut tx = self.store.write();
            let job = tx.job(id)?;
            if !job.status.can_transition_to(JobStatus::Cancelled) {
                return Err(invalid(
                    "job",
                    job.status.as_str(),
                    "cancelled",
                    "job already reached a terminal status",
                ));
            }
            snapshot = Snapshot::Job(job);
            let updated = tx.update_job(id, |j| j.status = JobStatus::Cancelled)?;
            tx.commit();
            updated
        };

        match self
            .sync
            .push_update(EntityKind::Job, id, json!({"status": "cancelled"}))
            .await
        {
            Ok(()) => Ok(updated),
            Err(err) => {
                self.rollback(vec![snapshot], &[]);
                Err(err)
            }
        }
    }

    /// Restores pre-mutation snapshots and removes entities created by the
    /// failed transition, in one commit.
    fn rollback(&self, snapshots: Vec<Snapshot>, created: &[(EntityKind, Uuid)]) {
        let mut tx = self.store.write();
        for (kind, id) in created {
            let removed = match kind {
                EntityKind::Contract => tx.remove_contract(*id).map(|_| ()),
                EntityKind::Milestone => tx.remove_milestone(*id).map(|_| ()),
                EntityKind::Payment => tx.remove_payment(*id).map(|_| ()),
                EntityKind::Job => tx.remove_job(*id).map(|_| ()),
                EntityKind::Proposal => tx.remove_proposal(*id).map(|_| ()),
                EntityKind::User => Ok(()),
            };
            if let Err(err) = removed {
                warn!(error = %err, kind = kind.as_str(), "Rollback removal failed");
            }
        }
        for snapshot in snapshots {
            let restored = match snapshot {
                Snapshot::Job(job) => tx.update_job(job.id, |j| *j = job.clone()).map(|_| ()),
                Snapshot::Proposal(p) => tx.update_proposal(p.id, |cur| *cur = p.clone()).map(|_| ()),
                Snapshot::Contract(c) => tx.update_contract(c.id, |cur| *cur = c.clone()).map(|_| ()),
                Snapshot::Milestone(m) => tx.update_milestone(m.id, |cur| *cur = m.clone()).map(|_| ()),
                Snapshot::Payment(p) => tx.update_payment(p.id, |cur| *cur = p.clone()).map(|_| ()),
            };
            if let Err(err) = restored {
                warn!(error = %err, "Rollback restore failed");
            }
        }
        tx.commit();
    }
}
