//! `stgcmt-core` — foundation building blocks shared by the storage commitment crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AeTitle, DeviceName, ExporterId, RecordId, SeriesInstanceUid, SopInstanceUid,
    StudyInstanceUid, TransactionUid,
};
pub use value_object::ValueObject;
