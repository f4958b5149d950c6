//! The per-repository compliance engine and its work queue.
//!
//! The queue turns webhook bursts and scheduler sweeps into bounded,
//! concurrent per-repository checks; the engine decides, idempotently,
//! whether to create, reuse, or rebuild a proposal for each repository.

mod engine;
mod properties;
mod queue;

pub use engine::{Engine, EngineError, BRANCH_NAME, PR_TITLE};
pub use properties::{CATALOG_INFO_BRANCH_NAME, CATALOG_INFO_PR_TITLE, PROPERTIES_BRANCH_NAME, PROPERTIES_PR_TITLE};
pub use queue::{EnqueueError, Queue, RepoJob, Trigger};
