pub mod filter;

pub use filter::{
    derive_freelancer_list, derive_job_list, FreelancerFilter, FreelancerSort, JobFilter, JobSort,
    Select,
};
