//! Eviction of soft-deleted conversation groups and superseded memory
//! epochs.

mod worker;

pub use worker::{EvictionRunResult, run_eviction, start_eviction_worker};
