//! In-memory record persistence.

mod repository;

pub use repository::{MemoryRecordStore, SaveCall};
