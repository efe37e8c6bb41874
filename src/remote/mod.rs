pub mod memory;
pub mod postgrest;
pub mod table;

pub use memory::MemoryBackend;
pub use postgrest::PostgrestClient;
pub use table::{ListQuery, Predicate, TableClient};
