//! Maestro - multi-agent software-development orchestrator core.
//!
//! Four tightly coupled subsystems behind one crate:
//! - rule-based planner that turns a feature request into an acyclic plan
//! - dependency-resolving workflow engine with retries and checkpoints
//! - LLM provider registry with failover, rate limiting, and circuit breakers
//! - permission-gated shared memory over SQLite with semantic search

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{CoreError, CoreResult};
pub use domain::models;
pub use domain::ports;
