//! Import orchestration
//!
//! Runs the three categories in a fixed order against one store session,
//! keeps a failing category from affecting the others, and finishes with a
//! single commit (or a rollback for dry runs).

use crate::error::ImportError;
use crate::factors::{
    load_postcodes, load_region_factors, load_vehicle_factors, load_yearly_mileage_factors,
    PostcodeColumns, Source,
};
use crate::observer::{ImportEvent, ImportObserver};
use crate::reconcile::{
    reconcile_mileage_factors, reconcile_regions_and_postcodes, reconcile_vehicle_factors, Tally,
};
use crate::store::{Store, StoreError, Table};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default directory holding the four input files
pub const DEFAULT_DATA_DIR: &str = "csv-files";

/// Independent import units, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    YearlyMileage,
    Vehicle,
    RegionsAndPostcodes,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::YearlyMileage,
        Category::Vehicle,
        Category::RegionsAndPostcodes,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::YearlyMileage => "yearly mileage factors",
            Category::Vehicle => "vehicle factors",
            Category::RegionsAndPostcodes => "postcodes and region factors",
        };
        f.write_str(name)
    }
}

/// Where the input files live
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSources {
    pub region_factors: PathBuf,
    pub postcodes: PathBuf,
    pub vehicle_factors: PathBuf,
    pub yearly_mileage_factors: PathBuf,
    pub postcode_columns: PostcodeColumns,
}

impl ImportSources {
    /// Default file names inside `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            region_factors: dir.join(Source::RegionFactors.default_file_name()),
            postcodes: dir.join(Source::Postcodes.default_file_name()),
            vehicle_factors: dir.join(Source::VehicleFactors.default_file_name()),
            yearly_mileage_factors: dir.join(Source::YearlyMileageFactors.default_file_name()),
            postcode_columns: PostcodeColumns::default(),
        }
    }
}

impl Default for ImportSources {
    fn default() -> Self {
        Self::in_dir(DEFAULT_DATA_DIR)
    }
}

/// What happened to one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryOutcome {
    pub category: Category,
    /// Records loaded from the input file(s)
    pub records: usize,
    /// Rows dropped while normalizing (postcodes only)
    pub dropped_rows: usize,
    pub tallies: BTreeMap<Table, Tally>,
    pub error: Option<String>,
}

impl CategoryOutcome {
    fn failed(category: Category, error: &ImportError) -> Self {
        Self {
            category,
            records: 0,
            dropped_rows: 0,
            tallies: BTreeMap::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn tally(&self, table: Table) -> Option<&Tally> {
        self.tallies.get(&table)
    }
}

/// Summary of a whole run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub committed: bool,
    pub categories: Vec<CategoryOutcome>,
}

impl RunReport {
    pub fn outcome(&self, category: Category) -> Option<&CategoryOutcome> {
        self.categories.iter().find(|outcome| outcome.category == category)
    }

    pub fn failed_categories(&self) -> impl Iterator<Item = &CategoryOutcome> {
        self.categories.iter().filter(|outcome| !outcome.succeeded())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_categories().next().is_none()
    }
}

/// Runs a full import against one store session
pub struct Importer<'a> {
    sources: ImportSources,
    observer: &'a dyn ImportObserver,
    dry_run: bool,
}

impl<'a> Importer<'a> {
    pub fn new(sources: ImportSources, observer: &'a dyn ImportObserver) -> Self {
        Self {
            sources,
            observer,
            dry_run: false,
        }
    }

    /// Roll back instead of committing at the end
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Import all categories and finish the transaction.
    ///
    /// Category failures are recorded in the report. Only a failure to
    /// commit or roll back is returned as an error.
    pub fn run(&self, store: &mut dyn Store) -> Result<RunReport, StoreError> {
        let started_at = Utc::now();

        let categories: Vec<CategoryOutcome> = Category::ALL
            .iter()
            .map(|&category| match self.import(category, store) {
                Ok(outcome) => {
                    self.observer.notify(ImportEvent::CategoryImported {
                        category,
                        records: outcome.records,
                    });
                    outcome
                }
                Err(err) => {
                    self.observer.notify(ImportEvent::CategoryFailed {
                        category,
                        cause: err.to_string(),
                    });
                    CategoryOutcome::failed(category, &err)
                }
            })
            .collect();

        if self.dry_run {
            store.rollback()?;
            self.observer.notify(ImportEvent::RolledBack);
        } else {
            store.commit()?;
            self.observer.notify(ImportEvent::Committed);
        }

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            committed: !self.dry_run,
            categories,
        })
    }

    /// Load and reconcile a single category without finishing the transaction
    pub fn import(
        &self,
        category: Category,
        store: &mut dyn Store,
    ) -> Result<CategoryOutcome, ImportError> {
        let mut outcome = CategoryOutcome {
            category,
            records: 0,
            dropped_rows: 0,
            tallies: BTreeMap::new(),
            error: None,
        };

        match category {
            Category::YearlyMileage => {
                let records =
                    load_yearly_mileage_factors(&self.sources.yearly_mileage_factors, self.observer)?;
                let tally = reconcile_mileage_factors(&records, store, self.observer)?;
                outcome.records = records.len();
                outcome.tallies.insert(Table::YearlyMileage, tally);
            }
            Category::Vehicle => {
                let records = load_vehicle_factors(&self.sources.vehicle_factors, self.observer)?;
                let tally = reconcile_vehicle_factors(&records, store, self.observer)?;
                outcome.records = records.len();
                outcome.tallies.insert(Table::Vehicle, tally);
            }
            Category::RegionsAndPostcodes => {
                let factors = load_region_factors(&self.sources.region_factors, self.observer)?;
                let postcodes = load_postcodes(
                    &self.sources.postcodes,
                    self.sources.postcode_columns,
                    self.observer,
                )?;
                let summary =
                    reconcile_regions_and_postcodes(&postcodes.records, &factors, store, self.observer)?;
                outcome.records = postcodes.records.len();
                outcome.dropped_rows = postcodes.dropped;
                outcome.tallies.insert(Table::Regions, summary.regions);
                outcome.tallies.insert(Table::Postcodes, summary.postcodes);
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn write_sources(dir: &TempDir) -> ImportSources {
        fs::write(
            dir.path().join("yearly_mileage_factor_mapping.csv"),
            "YEARLY_MILEAGE_FROM,YEARLY_MILEAGE_TO,FACTOR\n0,5000,0.8\n5001,-1,1.2\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("vehicle_factor_mapping.csv"),
            "VEHICLE_TYPE,VEHICLE_FACTOR\nSUV,1.2\nLKW,1.4\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("region_factor_mapping.csv"),
            "REGION1,REGION_FACTOR\nBayern,1.6\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("postcodes.csv"),
            "DE,DE-BY,Bayern,x,x,x,80331,München\nDE,DE-BY,Bayern,x,x,x,n/a,x\n",
        )
        .unwrap();
        ImportSources::in_dir(dir.path())
    }

    #[test]
    fn test_in_dir_uses_default_names() {
        let sources = ImportSources::in_dir("data");
        assert_eq!(sources.postcodes, PathBuf::from("data/postcodes.csv"));
        assert_eq!(
            sources.yearly_mileage_factors,
            PathBuf::from("data/yearly_mileage_factor_mapping.csv")
        );
        assert_eq!(sources.postcode_columns, PostcodeColumns::default());
    }

    #[test]
    fn test_run_imports_all_categories_and_commits() {
        let dir = TempDir::new().unwrap();
        let observer = RecordingObserver::new();
        let mut store = MemoryStore::new();

        let report = Importer::new(write_sources(&dir), &observer).run(&mut store).unwrap();

        assert!(report.all_succeeded());
        assert!(report.committed);
        let order: Vec<Category> = report.categories.iter().map(|c| c.category).collect();
        assert_eq!(order, Category::ALL.to_vec());

        let regions = report.outcome(Category::RegionsAndPostcodes).unwrap();
        assert_eq!(regions.records, 1);
        assert_eq!(regions.dropped_rows, 1);
        assert_eq!(regions.tally(Table::Postcodes).unwrap().inserted, 1);

        assert_eq!(store.commits(), 1);
        assert_eq!(store.committed_rows(Table::YearlyMileage).len(), 2);
        assert_eq!(store.committed_rows(Table::Vehicle).len(), 2);
        assert_eq!(store.committed_rows(Table::Regions).len(), 1);
    }

    #[test]
    fn test_failing_category_does_not_block_others() {
        let dir = TempDir::new().unwrap();
        let sources = write_sources(&dir);
        fs::remove_file(&sources.vehicle_factors).unwrap();
        let observer = RecordingObserver::new();
        let mut store = MemoryStore::new();

        let report = Importer::new(sources, &observer).run(&mut store).unwrap();

        let vehicle = report.outcome(Category::Vehicle).unwrap();
        assert!(!vehicle.succeeded());
        assert!(vehicle.error.as_deref().unwrap().contains("not found"));
        assert_eq!(report.failed_categories().count(), 1);

        assert!(report.committed);
        assert_eq!(store.committed_rows(Table::YearlyMileage).len(), 2);
        assert_eq!(store.committed_rows(Table::Regions).len(), 1);
        assert!(store.committed_rows(Table::Vehicle).is_empty());
        assert_eq!(
            observer.count(|e| matches!(
                e,
                ImportEvent::CategoryFailed { category: Category::Vehicle, .. }
            )),
            1
        );
    }

    #[test]
    fn test_store_failure_in_one_category_keeps_the_rest() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryStore::new();
        store.fail_fetch(Table::Postcodes);

        let report = Importer::new(write_sources(&dir), &RecordingObserver::new())
            .run(&mut store)
            .unwrap();

        assert!(!report.outcome(Category::RegionsAndPostcodes).unwrap().succeeded());
        assert_eq!(store.committed_rows(Table::Vehicle).len(), 2);
    }

    #[test]
    fn test_dry_run_rolls_back() {
        let dir = TempDir::new().unwrap();
        let observer = RecordingObserver::new();
        let mut store = MemoryStore::new();

        let report = Importer::new(write_sources(&dir), &observer)
            .dry_run(true)
            .run(&mut store)
            .unwrap();

        assert!(report.all_succeeded());
        assert!(!report.committed);
        assert_eq!(store.commits(), 0);
        assert!(store.rows(Table::Vehicle).is_empty());
        assert!(observer.events().contains(&ImportEvent::RolledBack));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let dir = TempDir::new().unwrap();
        let mut store = MemoryStore::new();
        let report = Importer::new(write_sources(&dir), &RecordingObserver::new())
            .run(&mut store)
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["committed"], true);
        assert_eq!(json["categories"][1]["category"], "vehicle");
        assert_eq!(json["categories"][1]["tallies"]["vehicle"]["inserted"], 2);
    }
}
