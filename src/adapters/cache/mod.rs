//! Caching decorators over persistence ports.

pub mod cached_memory_store;

pub use cached_memory_store::CachedMemoryStore;
