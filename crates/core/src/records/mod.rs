//! Patient record models, schema and the persistence contract.

mod record_model;
mod record_schema;
mod records_traits;

pub use record_model::*;
pub use record_schema::*;
pub use records_traits::*;
