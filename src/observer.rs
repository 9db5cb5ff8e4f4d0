//! Import events and the observers that receive them
//!
//! Components never log directly. They report [`ImportEvent`]s to an
//! injected [`ImportObserver`]; the binary wires in [`LogObserver`], which
//! forwards everything to the `log` facade.

use crate::factors::Source;
use crate::pipeline::Category;
use crate::store::Table;
use log::Level;
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;

/// Something worth reporting during an import run
#[derive(Debug, Clone, PartialEq)]
pub enum ImportEvent {
    LoadStarted { source: Source, path: PathBuf },
    Loaded { source: Source, records: usize },
    DuplicateKey { source: Source, key: String },
    RowDropped { source: Source, line: u64, field: String },
    RowsDropped { source: Source, dropped: usize },
    FactorDefaulted { region: String, factor: f64 },
    Inserted { table: Table, key: String, id: i64 },
    AlreadyPresent { table: Table, key: String, id: Option<i64> },
    KeyFailed { table: Table, key: String, cause: String },
    RegionImported {
        region: String,
        region_id: i64,
        inserted: usize,
        skipped: usize,
    },
    CategoryImported { category: Category, records: usize },
    CategoryFailed { category: Category, cause: String },
    Committed,
    RolledBack,
}

impl ImportEvent {
    /// Log level the event is reported at
    pub fn level(&self) -> Level {
        match self {
            ImportEvent::RowDropped { .. } => Level::Debug,
            // Postcodes come in thousands; per-row chatter stays at debug
            ImportEvent::Inserted { table: Table::Postcodes, .. }
            | ImportEvent::AlreadyPresent { table: Table::Postcodes, .. } => Level::Debug,
            ImportEvent::DuplicateKey { .. }
            | ImportEvent::RowsDropped { .. }
            | ImportEvent::FactorDefaulted { .. } => Level::Warn,
            ImportEvent::KeyFailed { .. } | ImportEvent::CategoryFailed { .. } => Level::Error,
            _ => Level::Info,
        }
    }
}

impl fmt::Display for ImportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportEvent::LoadStarted { source, path } => {
                write!(f, "Loading {} from {}", source, path.display())
            }
            ImportEvent::Loaded { source, records } => {
                write!(f, "{} {} records loaded", records, source)
            }
            ImportEvent::DuplicateKey { source, key } => {
                let kept = match source {
                    Source::RegionFactors => "last",
                    _ => "first",
                };
                write!(f, "Duplicate key '{}' in {}, keeping {} occurrence", key, source, kept)
            }
            ImportEvent::RowDropped { source, line, field } => {
                write!(f, "Dropped {} line {}: no 5-digit postcode in {:?}", source, line, field)
            }
            ImportEvent::RowsDropped { source, dropped } => {
                write!(f, "{} rows dropped from {}", dropped, source)
            }
            ImportEvent::FactorDefaulted { region, factor } => {
                write!(f, "No factor for region '{}', defaulting to {}", region, factor)
            }
            ImportEvent::Inserted { table, key, id } => {
                write!(f, "'{}' added to {} (id={})", key, table, id)
            }
            ImportEvent::AlreadyPresent { table, key, id: Some(id) } => {
                write!(f, "'{}' already exists in {} (id={})", key, table, id)
            }
            ImportEvent::AlreadyPresent { table, key, id: None } => {
                write!(f, "'{}' already exists in {}", key, table)
            }
            ImportEvent::KeyFailed { table, key, cause } => {
                write!(f, "Error processing {} '{}': {}", table, key, cause)
            }
            ImportEvent::RegionImported { region, region_id, inserted, skipped } => write!(
                f,
                "Region '{}' (id={}): {} new postcodes, {} already present",
                region, region_id, inserted, skipped
            ),
            ImportEvent::CategoryImported { category, records } => {
                write!(f, "{} imported ({} records)", category, records)
            }
            ImportEvent::CategoryFailed { category, cause } => {
                write!(f, "Failed to import {}: {}", category, cause)
            }
            ImportEvent::Committed => write!(f, "All data imported and committed"),
            ImportEvent::RolledBack => write!(f, "Import rolled back"),
        }
    }
}

/// Receiver for import events
pub trait ImportObserver {
    fn notify(&self, event: ImportEvent);
}

/// Forwards events to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ImportObserver for LogObserver {
    fn notify(&self, event: ImportEvent) {
        log::log!(target: "factor_import", event.level(), "{}", event);
    }
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<ImportEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    pub fn events(&self) -> Vec<ImportEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ImportEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }
}

impl ImportObserver for RecordingObserver {
    fn notify(&self, event: ImportEvent) {
        self.events.borrow_mut().push(event);
    }
}
