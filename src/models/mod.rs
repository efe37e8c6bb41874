pub mod contract;
pub mod job;
pub mod milestone;
pub mod payment;
pub mod proposal;
pub mod user;
