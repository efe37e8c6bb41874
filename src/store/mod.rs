pub mod entity_store;

pub use entity_store::{EntityKind, EntityStore, StoreEvent, StoreTx};
