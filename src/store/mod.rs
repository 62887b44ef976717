//! The prompt library and where it is kept.

pub mod library;
pub mod persist;
pub mod snapshot;

pub use library::{GenerationSettings, Library, Prompt};
pub use persist::{LibraryStore, MemoryStore, SqliteStore};
pub use snapshot::Snapshot;
