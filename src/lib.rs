//! Factor Import - Batch loader for pricing factor lookup tables
//!
//! This library provides:
//! - CSV normalization and validation for region, postcode, vehicle and
//!   yearly-mileage factor files
//! - Idempotent reconciliation of the loaded records against a relational store
//! - An orchestrator that isolates failures per category and commits once
//! - In-memory and PostgreSQL store implementations

pub mod error;
pub mod factors;
pub mod observer;
pub mod pipeline;
pub mod reconcile;
pub mod store;

// Re-export commonly used types
pub use error::{ImportError, LoadError, LoadErrorKind};
pub use factors::{
    PostcodeColumns, PostcodeRecord, PostcodeSet, RegionFactors, VehicleFactorRecord,
    YearlyMileageRecord,
};
pub use observer::{ImportEvent, ImportObserver, LogObserver, RecordingObserver};
pub use pipeline::{Category, CategoryOutcome, ImportSources, Importer, RunReport};
pub use reconcile::{RegionSummary, Tally};
pub use store::{MemoryStore, Store, StoreError, Table, Value};
