//! Filesystem adapters: checkpoint store, plan archive, and seed loader.

pub mod checkpoint_store;
pub mod plan_writer;
pub mod seed_loader;

pub use checkpoint_store::FsCheckpointStore;
pub use plan_writer::FsPlanWriter;
pub use seed_loader::SeedLoader;
