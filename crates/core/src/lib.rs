//! Carechart core: patient record model, change tracking, payload
//! normalization and the save/retry taxonomy shared by the record sync crates.

pub mod errors;
pub mod records;
pub mod sync;

pub use errors::{Error, Result};
