//! Infrastructure layer: ledger and archive persistence, exporter registry, units of work,
//! and the storage commitment correlator that composes them.

pub mod archive_store;
pub mod config;
pub mod correlator;
pub mod exporter_registry;
pub mod ledger;
pub mod pg;
pub mod services;
pub mod unit_of_work;


pub use correlator::{ConfirmationCorrelator, CorrelationError, CorrelationOutcome, CorrelationSummary};
pub use services::{StgCmtServices, build_in_memory_services, build_services};
