//! Change tracking, payload normalization and save/retry policy.

pub mod canonical;
mod change_tracker;
mod payload_normalizer;
mod retry_policy;
mod save_model;
mod save_scheduler;

pub use change_tracker::*;
pub use payload_normalizer::*;
pub use retry_policy::*;
pub use save_model::*;
pub use save_scheduler::*;
