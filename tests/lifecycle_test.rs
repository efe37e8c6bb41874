mod common;

use uuid::Uuid;

use common::{job_payload, milestone_payload, proposal_payload, state};
use marketplace_core::error::Error;
use marketplace_core::models::contract::{Contract, ContractStatus};
use marketplace_core::models::job::JobStatus;
use marketplace_core::models::milestone::MilestoneStatus;
use marketplace_core::models::payment::PaymentStatus;
use marketplace_core::models::proposal::ProposalStatus;
use marketplace_core::services::lifecycle_service::{AcceptPolicy, Transition};
use marketplace_core::store::EntityKind;
use marketplace_core::CoreState;

async fn setup_contract(core: &CoreState) -> Contract {
    let client_id = Uuid::new_v4();
    let freelancer_id = Uuid::new_v4();
    let job = core
        .sync
        .create_job(job_payload(client_id, 5000, 10000))
        .await
        .expect("create job");
    let proposal = core
        .sync
        .submit_proposal(proposal_payload(job.id, freelancer_id, 8500))
        .await
        .expect("submit proposal");
    core.lifecycle
        .accept_proposal(proposal.id, "Milestone-based delivery".to_string())
        .await
        .expect("accept proposal")
}

#[tokio::test]
async fn accepting_a_proposal_starts_the_job_and_creates_a_contract() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let client_id = Uuid::new_v4();
    let freelancer_id = Uuid::new_v4();

    let job = core
        .sync
        .create_job(job_payload(client_id, 5000, 10000))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Open);

    let proposal = core
        .sync
        .submit_proposal(proposal_payload(job.id, freelancer_id, 8500))
        .await
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);

    let contract = core
        .lifecycle
        .accept_proposal(proposal.id, "Terms".to_string())
        .await
        .unwrap();

    assert_eq!(contract.status, ContractStatus::Active);
    assert_eq!(contract.job_id, job.id);
    assert_eq!(contract.client_id, client_id);
    assert_eq!(contract.freelancer_id, freelancer_id);
    assert!(core.store.milestones_for_contract(contract.id).is_empty());

    assert_eq!(core.store.job(job.id).unwrap().status, JobStatus::InProgress);
    assert_eq!(
        core.store.proposal(proposal.id).unwrap().status,
        ProposalStatus::Accepted
    );
    assert_eq!(core.store.contract_for_job(job.id).unwrap().id, contract.id);
}

#[tokio::test]
async fn accepting_rejects_pending_siblings_under_that_policy() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let job = core
        .sync
        .create_job(job_payload(Uuid::new_v4(), 1000, 2000))
        .await
        .unwrap();
    let winner = core
        .sync
        .submit_proposal(proposal_payload(job.id, Uuid::new_v4(), 1500))
        .await
        .unwrap();
    let loser = core
        .sync
        .submit_proposal(proposal_payload(job.id, Uuid::new_v4(), 1200))
        .await
        .unwrap();

    core.lifecycle
        .accept_proposal(winner.id, "Terms".to_string())
        .await
        .unwrap();

    assert_eq!(
        core.store.proposal(loser.id).unwrap().status,
        ProposalStatus::Rejected
    );
}

#[tokio::test]
async fn accepting_leaves_pending_siblings_under_the_other_policy() {
    let (core, _) = state(AcceptPolicy::LeaveSiblings);
    let job = core
        .sync
        .create_job(job_payload(Uuid::new_v4(), 1000, 2000))
        .await
        .unwrap();
    let winner = core
        .sync
        .submit_proposal(proposal_payload(job.id, Uuid::new_v4(), 1500))
        .await
        .unwrap();
    let sibling = core
        .sync
        .submit_proposal(proposal_payload(job.id, Uuid::new_v4(), 1200))
        .await
        .unwrap();

    core.lifecycle
        .accept_proposal(winner.id, "Terms".to_string())
        .await
        .unwrap();

    assert_eq!(
        core.store.proposal(sibling.id).unwrap().status,
        ProposalStatus::Pending
    );
}

#[tokio::test]
async fn accepting_fails_when_the_job_is_no_longer_open() {
    let (core, _) = state(AcceptPolicy::LeaveSiblings);
    let job = core
        .sync
        .create_job(job_payload(Uuid::new_v4(), 1000, 2000))
        .await
        .unwrap();
    let first = core
        .sync
        .submit_proposal(proposal_payload(job.id, Uuid::new_v4(), 1500))
        .await
        .unwrap();
    let second = core
        .sync
        .submit_proposal(proposal_payload(job.id, Uuid::new_v4(), 1300))
        .await
        .unwrap();

    core.lifecycle
        .accept_proposal(first.id, "Terms".to_string())
        .await
        .unwrap();

    let err = core
        .lifecycle
        .accept_proposal(second.id, "Terms".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { entity: "proposal", .. }));

    // Both entities are left unchanged.
    assert_eq!(
        core.store.proposal(second.id).unwrap().status,
        ProposalStatus::Pending
    );
    assert_eq!(core.store.job(job.id).unwrap().status, JobStatus::InProgress);
}

#[tokio::test]
async fn approving_a_milestone_creates_exactly_one_pending_payment() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let contract = setup_contract(&core).await;

    let milestone = core
        .lifecycle
        .add_milestone(contract.id, milestone_payload("Design", 2500))
        .await
        .unwrap();
    assert_eq!(milestone.status, MilestoneStatus::Pending);

    core.lifecycle.start_milestone(milestone.id).await.unwrap();
    let submitted = core.lifecycle.submit_milestone(milestone.id).await.unwrap();
    assert!(submitted.submitted_at.is_some());

    let payment = core.lifecycle.approve_milestone(milestone.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, milestone.amount);
    assert_eq!(payment.milestone_id, Some(milestone.id));

    let approved = core.store.milestone(milestone.id).unwrap();
    assert_eq!(approved.status, MilestoneStatus::Approved);
    assert!(approved.approved_at.is_some());

    assert_eq!(core.store.payments_for_contract(contract.id).len(), 1);
}

#[tokio::test]
async fn releasing_advances_milestone_and_payment_as_one_unit() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let contract = setup_contract(&core).await;
    let milestone = core
        .lifecycle
        .add_milestone(contract.id, milestone_payload("Build", 4000))
        .await
        .unwrap();
    core.lifecycle.start_milestone(milestone.id).await.unwrap();
    core.lifecycle.submit_milestone(milestone.id).await.unwrap();
    let payment = core.lifecycle.approve_milestone(milestone.id).await.unwrap();

    let mut events = core.store.subscribe();
    let (released, completed) = core.lifecycle.release_milestone(milestone.id).await.unwrap();
    assert_eq!(released.status, MilestoneStatus::Released);
    assert_eq!(completed.status, PaymentStatus::Completed);
    assert_eq!(completed.id, payment.id);

    // Both changes arrive in a single event; no subscriber can observe the
    // milestone released without the payment completed.
    let event = events.try_recv().expect("one event");
    assert!(event.changes.contains(&(EntityKind::Milestone, milestone.id)));
    assert!(event.changes.contains(&(EntityKind::Payment, payment.id)));
}

#[tokio::test]
async fn a_submitted_milestone_can_be_rejected_terminally() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let contract = setup_contract(&core).await;
    let milestone = core
        .lifecycle
        .add_milestone(contract.id, milestone_payload("Copywriting", 800))
        .await
        .unwrap();

    // Rejection is only legal from submitted.
    let err = core.lifecycle.reject_milestone(milestone.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    core.lifecycle.start_milestone(milestone.id).await.unwrap();
    core.lifecycle.submit_milestone(milestone.id).await.unwrap();
    let rejected = core.lifecycle.reject_milestone(milestone.id).await.unwrap();
    assert_eq!(rejected.status, MilestoneStatus::Rejected);

    let err = core.lifecycle.approve_milestone(milestone.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(
        core.store.milestone(milestone.id).unwrap().status,
        MilestoneStatus::Rejected
    );
}

#[tokio::test]
async fn a_contract_completes_only_when_every_milestone_is_settled() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let contract = setup_contract(&core).await;
    let milestone = core
        .lifecycle
        .add_milestone(contract.id, milestone_payload("Everything", 8500))
        .await
        .unwrap();
    core.lifecycle.start_milestone(milestone.id).await.unwrap();
    core.lifecycle.submit_milestone(milestone.id).await.unwrap();
    core.lifecycle.approve_milestone(milestone.id).await.unwrap();

    let err = core.lifecycle.complete_contract(contract.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { entity: "contract", .. }));
    assert_eq!(
        core.store.contract(contract.id).unwrap().status,
        ContractStatus::Active
    );

    core.lifecycle.release_milestone(milestone.id).await.unwrap();
    let completed = core.lifecycle.complete_contract(contract.id).await.unwrap();
    assert_eq!(completed.status, ContractStatus::Completed);
    assert!(completed.ended_at.is_some());
    assert_eq!(
        core.store.job(contract.job_id).unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn cancelling_a_contract_cancels_the_job() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let contract = setup_contract(&core).await;

    let cancelled = core.lifecycle.cancel_contract(contract.id).await.unwrap();
    assert_eq!(cancelled.status, ContractStatus::Cancelled);
    assert_eq!(
        core.store.job(contract.job_id).unwrap().status,
        JobStatus::Cancelled
    );

    // Terminal: no way back.
    let err = core.lifecycle.complete_contract(contract.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn milestones_cannot_be_added_to_a_settled_contract() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let contract = setup_contract(&core).await;
    core.lifecycle.cancel_contract(contract.id).await.unwrap();

    let err = core
        .lifecycle
        .add_milestone(contract.id, milestone_payload("Late addition", 100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { entity: "contract", .. }));
    assert!(core.store.milestones_for_contract(contract.id).is_empty());
}

#[tokio::test]
async fn cancelling_a_job_twice_fails_and_changes_nothing() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let job = core
        .sync
        .create_job(job_payload(Uuid::new_v4(), 100, 300))
        .await
        .unwrap();

    let cancelled = core.lifecycle.cancel_job(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let err = core.lifecycle.cancel_job(job.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { entity: "job", .. }));
    assert_eq!(core.store.job(job.id).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn transitions_can_be_invoked_by_id_and_target() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let contract = setup_contract(&core).await;
    let milestone = core
        .lifecycle
        .add_milestone(contract.id, milestone_payload("QA", 500))
        .await
        .unwrap();

    core.lifecycle
        .invoke(milestone.id, Transition::StartMilestone)
        .await
        .unwrap();
    core.lifecycle
        .invoke(milestone.id, Transition::SubmitMilestone)
        .await
        .unwrap();
    assert_eq!(
        core.store.milestone(milestone.id).unwrap().status,
        MilestoneStatus::Submitted
    );

    let err = core
        .lifecycle
        .invoke(milestone.id, Transition::ReleaseMilestone)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn approving_a_milestone_with_a_missing_contract_is_a_reference_error() {
    let (core, _) = state(AcceptPolicy::RejectSiblings);
    let err = core.lifecycle.approve_milestone(Uuid::new_v4()).await.unwrap_err();
    // The milestone itself is unknown here; a missing id is reported, not
    // silently ignored.
    assert!(matches!(err, Error::NotFound { .. }));
}
