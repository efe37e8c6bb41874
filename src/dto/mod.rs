pub mod job_dto;
pub mod milestone_dto;
pub mod proposal_dto;
