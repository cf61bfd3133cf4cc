//! Ratewarden - Fixed-Window Admission Control
//!
//! This crate admits or rejects inbound requests against a per-identity
//! request budget. A caller is identified by an API token when the token has
//! its own configured policy, and by its network address otherwise. Counting
//! state lives in a pluggable counter store (in-memory or Redis).

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;

pub use error::{Result, WardenError};
pub use ratelimit::{AdmissionEngine, LimitPolicy, PolicySet, Verdict};
pub use store::{CounterStore, MemoryStore, RedisStore};
