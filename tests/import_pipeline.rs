//! End-to-end import runs against the in-memory store
//!
//! Input files are written to a temporary directory in the same loose
//! format the production exports use (padded fields, quoted labels).

use approx::assert_relative_eq;
use factor_import::factors::{load_vehicle_factors, UNBOUNDED_MILEAGE};
use factor_import::reconcile::reconcile_vehicle_factors;
use factor_import::store::columns;
use factor_import::{
    Category, ImportSources, Importer, LogObserver, MemoryStore, RecordingObserver, Table, Value,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_inputs(dir: &Path) {
    fs::write(
        dir.join("yearly_mileage_factor_mapping.csv"),
        "YEARLY_MILEAGE_FROM, YEARLY_MILEAGE_TO, FACTOR
        0, 5000, 0.8
        5001, 10000, 1.0
        10001, 20000, 1.2
        20001, -1, 1.5
        ",
    )
    .unwrap();
    fs::write(
        dir.join("vehicle_factor_mapping.csv"),
        "VEHICLE_TYPE, VEHICLE_FACTOR
        \"SUV\", 1.2
        \"LKW\", 1.4",
    )
    .unwrap();
    fs::write(
        dir.join("region_factor_mapping.csv"),
        "REGION1, REGION_FACTOR
        \"Baden-Württemberg\", 1.1
        \"Bayern\", 1.6
        ",
    )
    .unwrap();
    fs::write(
        dir.join("postcodes.csv"),
        "\"DE\",\"DE-BW\",\"Baden-Württemberg\",\"Freiburg\",\"Breisgau-Hochschwarzwald\",\"Müllheim-Badenweiler\",\"79289\",\"Müllheim\"
\"DE\",\"DE-BY\",\"Bayern\",\"Oberbayern\",\"München\",\"München\",\"80331\",\"München\"
\"DE\",\"DE-HE\",\"Hessen\",\"Darmstadt\",\"Offenbach\",\"Seligenstadt\",\"63500\",\"Seligenstadt\"
\"DE\",\"DE-BW\",\"Baden-Württemberg\",\"Freiburg\",\"Beisgau-Hochschwarzwald\",\"Hexental\",\"not_a_postcode\"
",
    )
    .unwrap();
}

#[test]
fn test_vehicle_import_scenario() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path());
    let mut store = MemoryStore::new();

    let records = load_vehicle_factors(dir.path().join("vehicle_factor_mapping.csv"), &LogObserver)
        .unwrap();
    let first = reconcile_vehicle_factors(&records, &mut store, &LogObserver).unwrap();
    let second = reconcile_vehicle_factors(&records, &mut store, &LogObserver).unwrap();

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.inserts(), 2);

    let pairs: Vec<(Value, f64)> = store
        .rows(Table::Vehicle)
        .iter()
        .map(|row| {
            let factor = match row.get(columns::VEHICLE_FACTOR) {
                Some(Value::Float(factor)) => *factor,
                other => panic!("unexpected factor {:?}", other),
            };
            (row.get(columns::VEHICLE_TYPE).cloned().unwrap(), factor)
        })
        .collect();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].0, Value::from("SUV"));
    assert_relative_eq!(pairs[0].1, 1.2);
    assert_eq!(pairs[1].0, Value::from("LKW"));
    assert_relative_eq!(pairs[1].1, 1.4);
}

#[test]
fn test_full_import_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path());
    let mut store = MemoryStore::new();
    let observer = RecordingObserver::new();

    let first = Importer::new(ImportSources::in_dir(dir.path()), &observer)
        .run(&mut store)
        .unwrap();
    assert!(first.all_succeeded(), "{:?}", first.categories);
    let inserts = store.inserts();
    // 4 bands, 2 vehicles, 3 regions, 3 postcodes
    assert_eq!(inserts, 12);

    let second = Importer::new(ImportSources::in_dir(dir.path()), &observer)
        .run(&mut store)
        .unwrap();
    assert!(second.all_succeeded());
    assert_eq!(store.inserts(), inserts);
    for outcome in &second.categories {
        for tally in outcome.tallies.values() {
            assert_eq!(tally.inserted, 0, "{:?}", outcome.category);
        }
    }
}

#[test]
fn test_full_import_persists_normalized_values() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path());
    let mut store = MemoryStore::new();

    let report = Importer::new(ImportSources::in_dir(dir.path()), &LogObserver)
        .run(&mut store)
        .unwrap();

    let regions = report.outcome(Category::RegionsAndPostcodes).unwrap();
    assert_eq!(regions.dropped_rows, 1);

    let unbounded = store
        .committed_rows(Table::YearlyMileage)
        .iter()
        .find(|row| row.get(columns::YEARLY_MILEAGE_FROM) == Some(&Value::Int(20001)))
        .unwrap();
    assert_eq!(
        unbounded.get(columns::YEARLY_MILEAGE_TO),
        Some(&Value::Int(UNBOUNDED_MILEAGE))
    );

    // Hessen is not in the factor file
    let hessen = store
        .committed_rows(Table::Regions)
        .iter()
        .find(|row| row.get(columns::REGION) == Some(&Value::from("Hessen")))
        .unwrap();
    assert_eq!(hessen.get(columns::REGION_FACTOR), Some(&Value::Float(1.0)));

    let postcodes: Vec<&Value> = store
        .committed_rows(Table::Postcodes)
        .iter()
        .filter_map(|row| row.get(columns::POSTCODE))
        .collect();
    assert_eq!(
        postcodes,
        vec![&Value::from("79289"), &Value::from("80331"), &Value::from("63500")]
    );
}

#[test]
fn test_missing_data_dir_fails_every_category_but_still_commits() {
    let dir = TempDir::new().unwrap();
    let mut store = MemoryStore::new();

    let report = Importer::new(ImportSources::in_dir(dir.path().join("missing")), &LogObserver)
        .run(&mut store)
        .unwrap();

    assert_eq!(report.failed_categories().count(), 3);
    assert!(report.committed);
    assert_eq!(store.commits(), 1);
}
