//! Local backends for flowlink.
//!
//! - [`MemoryBus`]: completion bus held in memory
//! - [`FsArtifactStore`]: artifact buckets as directories
//! - [`LocalJobService`]: runs jobs as tokio tasks and child processes
//!
//! Together they run a whole workflow on one machine.

pub mod fs_store;
pub mod local;
pub mod memory_bus;

pub use fs_store::FsArtifactStore;
pub use local::LocalJobService;
pub use memory_bus::MemoryBus;
