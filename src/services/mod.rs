pub mod lifecycle_service;
pub mod sync_service;
