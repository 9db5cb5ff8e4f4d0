use super::{find_or_insert, isolated, report, Tally};
use crate::factors::{Source, VehicleFactorRecord};
use crate::observer::{ImportEvent, ImportObserver};
use crate::store::{columns, Store, StoreError, Table, Value};
use std::collections::HashSet;

/// Distinct vehicle types in first-seen order, each with its first factor
fn distinct_vehicle_types<'a>(
    records: &'a [VehicleFactorRecord],
    observer: &dyn ImportObserver,
) -> Vec<(&'a str, f64)> {
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();
    for record in records {
        if seen.insert(record.vehicle_type.as_str()) {
            distinct.push((record.vehicle_type.as_str(), record.factor));
        } else {
            observer.notify(ImportEvent::DuplicateKey {
                source: Source::VehicleFactors,
                key: record.vehicle_type.clone(),
            });
        }
    }
    distinct
}

/// Insert every vehicle type not yet in the `vehicle` table
pub fn reconcile_vehicle_factors(
    records: &[VehicleFactorRecord],
    store: &mut dyn Store,
    observer: &dyn ImportObserver,
) -> Result<Tally, StoreError> {
    let mut tally = Tally::default();

    for (vehicle_type, factor) in distinct_vehicle_types(records, observer) {
        let key = [(columns::VEHICLE_TYPE, Value::from(vehicle_type))];
        let attributes = [(columns::VEHICLE_FACTOR, Value::from(factor))];

        match isolated(store, |store| find_or_insert(store, Table::Vehicle, &key, &attributes))? {
            Ok(resolution) => {
                report(observer, Table::Vehicle, vehicle_type.to_string(), resolution);
                tally.record(resolution);
            }
            Err(err) => {
                tally.failed += 1;
                observer.notify(ImportEvent::KeyFailed {
                    table: Table::Vehicle,
                    key: vehicle_type.to_string(),
                    cause: err.to_string(),
                });
            }
        }
    }

    Ok(tally)
}
