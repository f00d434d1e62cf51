//! Adapters: concrete implementations of the domain ports.

pub mod cache;
pub mod fs;
pub mod providers;
pub mod sqlite;
