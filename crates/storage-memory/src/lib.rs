//! In-process implementation of the record store contract, used by tests,
//! demos and offline development.

pub mod records;

pub use records::{MemoryRecordStore, SaveCall};
