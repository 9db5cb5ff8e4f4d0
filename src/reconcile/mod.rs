//! Idempotent existence-check-then-insert reconciliation
//!
//! Each reconciler walks the distinct keys of its record set in first-seen
//! order, reuses rows that already exist and inserts the rest. Rows are
//! never updated, so re-running an import with the same input inserts
//! nothing.
//!
//! Every key is processed inside a store savepoint. A store error on one key
//! rolls back just that key, is reported, and the loop moves on. Errors
//! while managing the savepoint itself mean the session is unusable and end
//! the category.

mod mileage;
mod regions;
mod vehicles;

pub use mileage::reconcile_mileage_factors;
pub use regions::{reconcile_regions_and_postcodes, RegionSummary};
pub use vehicles::reconcile_vehicle_factors;

use crate::observer::{ImportEvent, ImportObserver};
use crate::store::{Field, Store, StoreError, Table};
use serde::Serialize;

/// Per-table counts of what happened to each distinct key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub inserted: usize,
    pub existing: usize,
    pub failed: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.inserted + self.existing + self.failed
    }

    fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Existing(_) => self.existing += 1,
            Resolution::Inserted(_) => self.inserted += 1,
        }
    }
}

/// How a key ended up in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Existing(i64),
    Inserted(i64),
}

impl Resolution {
    pub fn id(&self) -> i64 {
        match self {
            Resolution::Existing(id) | Resolution::Inserted(id) => *id,
        }
    }
}

/// Run `work` between a savepoint and its release.
///
/// The outer error is fatal; the inner one means `work` failed and its
/// changes were rolled back.
fn isolated<S, T, F>(store: &mut S, work: F) -> Result<Result<T, StoreError>, StoreError>
where
    S: Store + ?Sized,
    F: FnOnce(&mut S) -> Result<T, StoreError>,
{
    store.savepoint()?;
    match work(store) {
        Ok(value) => {
            store.release_savepoint()?;
            Ok(Ok(value))
        }
        Err(err) => {
            store.rollback_to_savepoint()?;
            Ok(Err(err))
        }
    }
}

/// Reuse the row matching `key`, or insert `key` plus `attributes`
fn find_or_insert(
    store: &mut dyn Store,
    table: Table,
    key: &[Field],
    attributes: &[Field],
) -> Result<Resolution, StoreError> {
    if let Some(id) = store.find_by_key(table, key)? {
        return Ok(Resolution::Existing(id));
    }
    let row: Vec<Field> = key.iter().chain(attributes).cloned().collect();
    Ok(Resolution::Inserted(store.insert(table, &row)?))
}

fn report(observer: &dyn ImportObserver, table: Table, key: String, resolution: Resolution) {
    let event = match resolution {
        Resolution::Existing(id) => ImportEvent::AlreadyPresent {
            table,
            key,
            id: Some(id),
        },
        Resolution::Inserted(id) => ImportEvent::Inserted { table, key, id },
    };
    observer.notify(event);
}
