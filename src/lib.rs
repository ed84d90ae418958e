//! engram: a multi-tenant conversation memory service.
//!
//! The engine stores conversation history and per-client agent memory,
//! with fork lineage inside conversation groups, group-scoped access
//! control, an epoch-based memory sync protocol, a read-through cache for
//! latest-epoch memory, and a retention pipeline that reclaims
//! soft-deleted groups and superseded epochs.
//!
//! Transport (REST/gRPC), authentication filters, the embedding model and
//! vector index, and the attachment blob store are external
//! collaborators; this crate exposes the service layer they bind to.

pub mod ancestry;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod retention;
pub mod services;
