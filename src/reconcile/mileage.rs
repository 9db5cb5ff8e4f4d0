use super::{find_or_insert, isolated, report, Tally};
use crate::factors::{Source, YearlyMileageRecord};
use crate::observer::{ImportEvent, ImportObserver};
use crate::store::{columns, describe_key, Store, StoreError, Table, Value};
use std::collections::HashSet;

/// Insert every `(from, to)` band not yet in the `yearly_mileage` table.
///
/// The factor of a band is taken from its first record.
pub fn reconcile_mileage_factors(
    records: &[YearlyMileageRecord],
    store: &mut dyn Store,
    observer: &dyn ImportObserver,
) -> Result<Tally, StoreError> {
    let mut seen = HashSet::new();
    let mut tally = Tally::default();

    for record in records {
        if !seen.insert(record.range()) {
            let (from, to) = record.range();
            observer.notify(ImportEvent::DuplicateKey {
                source: Source::YearlyMileageFactors,
                key: format!("{} - {}", from, to),
            });
            continue;
        }
        let key = [
            (columns::YEARLY_MILEAGE_FROM, Value::Int(record.mileage_from)),
            (columns::YEARLY_MILEAGE_TO, Value::Int(record.mileage_to)),
        ];
        let attributes = [(columns::YEARLY_MILEAGE_FACTOR, Value::Float(record.factor))];

        let outcome = isolated(store, |store| {
            find_or_insert(store, Table::YearlyMileage, &key, &attributes)
        })?;
        match outcome {
            Ok(resolution) => {
                report(observer, Table::YearlyMileage, describe_key(&key), resolution);
                tally.record(resolution);
            }
            Err(err) => {
                tally.failed += 1;
                observer.notify(ImportEvent::KeyFailed {
                    table: Table::YearlyMileage,
                    key: describe_key(&key),
                    cause: err.to_string(),
                });
            }
        }
    }

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::UNBOUNDED_MILEAGE;
    use crate::observer::RecordingObserver;
    use crate::store::MemoryStore;

    fn band(from: i64, to: i64, factor: f64) -> YearlyMileageRecord {
        YearlyMileageRecord {
            mileage_from: from,
            mileage_to: to,
            factor,
        }
    }

    fn sample() -> Vec<YearlyMileageRecord> {
        vec![
            band(0, 5000, 0.8),
            band(5001, 10000, 1.0),
            band(10001, 20000, 1.2),
            band(20001, UNBOUNDED_MILEAGE, 1.5),
        ]
    }

    #[test]
    fn test_new_entries() {
        let mut store = MemoryStore::new();
        let observer = RecordingObserver::new();

        let tally = reconcile_mileage_factors(&sample(), &mut store, &observer).unwrap();

        assert_eq!(tally, Tally { inserted: 4, existing: 0, failed: 0 });
        let last = &store.rows(Table::YearlyMileage)[3];
        assert_eq!(last.get(columns::YEARLY_MILEAGE_FROM), Some(&Value::Int(20001)));
        assert_eq!(last.get(columns::YEARLY_MILEAGE_TO), Some(&Value::Int(100_000_000)));
        assert_eq!(last.get(columns::YEARLY_MILEAGE_FACTOR), Some(&Value::Float(1.5)));
    }

    #[test]
    fn test_rerun_inserts_nothing() {
        let mut store = MemoryStore::new();
        let observer = RecordingObserver::new();
        reconcile_mileage_factors(&sample(), &mut store, &observer).unwrap();

        let tally = reconcile_mileage_factors(&sample(), &mut store, &observer).unwrap();

        assert_eq!(tally, Tally { inserted: 0, existing: 4, failed: 0 });
        assert_eq!(store.inserts(), 4);
    }

    #[test]
    fn test_duplicate_band_uses_first_factor() {
        let mut store = MemoryStore::new();
        let observer = RecordingObserver::new();
        let records = vec![band(0, 5000, 0.8), band(0, 5000, 0.9), band(0, 6000, 0.7)];

        let tally = reconcile_mileage_factors(&records, &mut store, &observer).unwrap();

        assert_eq!(tally.inserted, 2);
        assert_eq!(observer.count(|e| matches!(e, ImportEvent::DuplicateKey { .. })), 1);
        assert_eq!(
            store.rows(Table::YearlyMileage)[0].get(columns::YEARLY_MILEAGE_FACTOR),
            Some(&Value::Float(0.8))
        );
    }

    #[test]
    fn test_failing_range_does_not_stop_the_others() {
        let mut store = MemoryStore::new();
        store.fail_on(Table::YearlyMileage, 5001_i64);
        let observer = RecordingObserver::new();

        let tally = reconcile_mileage_factors(&sample(), &mut store, &observer).unwrap();

        assert_eq!(tally, Tally { inserted: 3, existing: 0, failed: 1 });
        assert_eq!(store.rows(Table::YearlyMileage).len(), 3);
        assert!(observer.events().iter().any(|e| matches!(
            e,
            ImportEvent::KeyFailed { key, .. } if key == "5001 - 10000"
        )));
    }
}
