use super::{find_or_insert, isolated, report, Resolution, Tally};
use crate::factors::{PostcodeRecord, RegionFactors, DEFAULT_REGION_FACTOR};
use crate::observer::{ImportEvent, ImportObserver};
use crate::store::{columns, Store, StoreError, Table, Value};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Outcome of a region/postcode reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    pub regions: Tally,
    /// `existing` counts postcodes already present anywhere in the table,
    /// including ones claimed by an earlier region in the same run
    pub postcodes: Tally,
}

/// Distinct regions in first-seen order, each with its distinct postcodes
/// in first-seen order
fn group_by_region(records: &[PostcodeRecord]) -> Vec<(&str, Vec<&str>)> {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for record in records {
        let region = record.region.as_str();
        let postcode = record.postcode.as_str();
        let slot = *index.entry(region).or_insert_with(|| {
            groups.push((region, Vec::new()));
            groups.len() - 1
        });
        if seen.insert((region, postcode)) {
            groups[slot].1.push(postcode);
        }
    }

    groups
}

/// Work done for one region inside its savepoint
struct RegionImport {
    region: Resolution,
    inserted: Vec<(String, i64)>,
    skipped: Vec<String>,
}

fn import_region(
    store: &mut dyn Store,
    region: &str,
    factor: f64,
    postcodes: &[&str],
    known: &HashSet<String>,
) -> Result<RegionImport, StoreError> {
    let key = [(columns::REGION, Value::from(region))];
    let attributes = [(columns::REGION_FACTOR, Value::Float(factor))];
    let resolution = find_or_insert(store, Table::Regions, &key, &attributes)?;

    let mut import = RegionImport {
        region: resolution,
        inserted: Vec::new(),
        skipped: Vec::new(),
    };
    for &postcode in postcodes {
        if known.contains(postcode) {
            import.skipped.push(postcode.to_string());
            continue;
        }
        let row = [
            (columns::REGION_ID, Value::Int(resolution.id())),
            (columns::POSTCODE, Value::from(postcode)),
        ];
        let id = store.insert(Table::Postcodes, &row)?;
        import.inserted.push((postcode.to_string(), id));
    }

    Ok(import)
}

/// Create missing regions and attach every postcode not yet in the store.
///
/// Regions without an entry in `factors` get [`DEFAULT_REGION_FACTOR`].
/// Postcodes are unique across the whole table: a postcode already stored,
/// or inserted earlier in this run for another region, is skipped. A store
/// error for one region rolls back that region and its postcodes only.
pub fn reconcile_regions_and_postcodes(
    records: &[PostcodeRecord],
    factors: &RegionFactors,
    store: &mut dyn Store,
    observer: &dyn ImportObserver,
) -> Result<RegionSummary, StoreError> {
    let mut known = store.fetch_all(Table::Postcodes, columns::POSTCODE)?;
    let mut summary = RegionSummary::default();

    for (region, postcodes) in group_by_region(records) {
        let factor = factors.get(region).unwrap_or_else(|| {
            observer.notify(ImportEvent::FactorDefaulted {
                region: region.to_string(),
                factor: DEFAULT_REGION_FACTOR,
            });
            DEFAULT_REGION_FACTOR
        });

        let outcome = isolated(store, |store| {
            import_region(store, region, factor, &postcodes, &known)
        })?;
        let import = match outcome {
            Ok(import) => import,
            Err(err) => {
                summary.regions.failed += 1;
                summary.postcodes.failed += postcodes
                    .iter()
                    .filter(|postcode| !known.contains(**postcode))
                    .count();
                observer.notify(ImportEvent::KeyFailed {
                    table: Table::Regions,
                    key: region.to_string(),
                    cause: err.to_string(),
                });
                continue;
            }
        };

        report(observer, Table::Regions, region.to_string(), import.region);
        summary.regions.record(import.region);

        for postcode in &import.skipped {
            observer.notify(ImportEvent::AlreadyPresent {
                table: Table::Postcodes,
                key: postcode.clone(),
                id: None,
            });
        }
        for (postcode, id) in &import.inserted {
            observer.notify(ImportEvent::Inserted {
                table: Table::Postcodes,
                key: postcode.clone(),
                id: *id,
            });
        }
        observer.notify(ImportEvent::RegionImported {
            region: region.to_string(),
            region_id: import.region.id(),
            inserted: import.inserted.len(),
            skipped: import.skipped.len(),
        });

        summary.postcodes.inserted += import.inserted.len();
        summary.postcodes.existing += import.skipped.len();
        known.extend(import.inserted.into_iter().map(|(postcode, _)| postcode));
    }

    Ok(summary)
}
