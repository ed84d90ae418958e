//! Background task processing.
//!
//! The task queue lives in the datastore (at-least-once, claim-based);
//! this module provides the claim worker and the handlers it dispatches
//! to. Handlers are registered by task type; a failing handler reschedules
//! its task with exponential backoff.

mod task_worker;
mod vector_index;

pub use task_worker::{TaskHandler, TaskWorker, start_task_worker};
pub use vector_index::{
    NoopVectorIndex, VECTOR_CLEANUP_TASK_TYPE, VectorCleanupHandler, VectorCleanupTask,
    VectorIndexPurge,
};
