//! Archive hierarchy store: the studies, series and instances whose retrieve locations
//! storage commitment updates.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryArchiveStore;
pub use postgres::PostgresArchiveStore;
pub use r#trait::{ArchiveStore, ArchiveStoreError};
