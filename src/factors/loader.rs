//! CSV loaders for the four factor files
//!
//! Every loader trims whitespace and double quotes from the header and from
//! each field, checks the required columns, and coerces factor and mileage
//! columns. A bad value anywhere in a column fails the whole file.

use super::normalize::{clean_field, extract_postcode, parse_factor, parse_mileage, MileageBound};
use super::{
    PostcodeColumns, PostcodeRecord, PostcodeSet, RegionFactors, Source, VehicleFactorRecord,
    YearlyMileageRecord,
};
use crate::error::LoadError;
use crate::observer::{ImportEvent, ImportObserver};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const REGION_COLUMN: &str = "REGION1";
pub const REGION_FACTOR_COLUMN: &str = "REGION_FACTOR";
pub const VEHICLE_TYPE_COLUMN: &str = "VEHICLE_TYPE";
pub const VEHICLE_FACTOR_COLUMN: &str = "VEHICLE_FACTOR";
pub const MILEAGE_FROM_COLUMN: &str = "YEARLY_MILEAGE_FROM";
pub const MILEAGE_TO_COLUMN: &str = "YEARLY_MILEAGE_TO";
pub const MILEAGE_FACTOR_COLUMN: &str = "FACTOR";

/// Label used in errors for data that did not come from a file
const READER_LABEL: &str = "<reader>";

/// One non-blank CSV line
#[derive(Debug)]
struct RawRow {
    line: u64,
    fields: Vec<String>,
}

/// Read all non-blank rows without interpreting a header
fn read_rows<R: Read>(reader: R, path: &Path) -> Result<Vec<RawRow>, LoadError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        rows.push(RawRow {
            line: record.position().map(|pos| pos.line()).unwrap_or(0),
            fields: record.iter().map(str::to_string).collect(),
        });
    }

    Ok(rows)
}

/// A headered CSV file with its required columns resolved
struct CsvTable {
    path: PathBuf,
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

impl CsvTable {
    fn read<R: Read>(reader: R, path: &Path, required: &[&str]) -> Result<Self, LoadError> {
        let mut rows = read_rows(reader, path)?;
        if rows.is_empty() {
            return Err(LoadError::Empty { path: path.to_path_buf() });
        }

        let header = rows.remove(0);
        let columns: Vec<String> = header
            .fields
            .iter()
            .map(|name| clean_field(name.trim_start_matches('\u{feff}')).to_string())
            .collect();

        if rows.is_empty() {
            return Err(LoadError::Empty { path: path.to_path_buf() });
        }

        let missing: Vec<String> = required
            .iter()
            .filter(|name| !columns.iter().any(|column| column == *name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(LoadError::MissingColumns {
                path: path.to_path_buf(),
                missing,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            columns,
            rows,
        })
    }

    fn invalid(&self, row: &RawRow, column: &str, value: &str) -> LoadError {
        LoadError::InvalidValue {
            path: self.path.clone(),
            column: column.to_string(),
            line: row.line,
            value: value.to_string(),
        }
    }

    /// Cleaned field; a short row is reported as an invalid value
    fn field<'r>(&self, row: &'r RawRow, column: &str) -> Result<&'r str, LoadError> {
        let index = self
            .columns
            .iter()
            .position(|name| name == column)
            .unwrap_or(usize::MAX);
        row.fields
            .get(index)
            .map(|raw| clean_field(raw))
            .ok_or_else(|| self.invalid(row, column, ""))
    }

    fn text(&self, row: &RawRow, column: &str) -> Result<String, LoadError> {
        let value = self.field(row, column)?;
        if value.is_empty() {
            return Err(self.invalid(row, column, value));
        }
        Ok(value.to_string())
    }

    fn factor(&self, row: &RawRow, column: &str) -> Result<f64, LoadError> {
        let value = self.field(row, column)?;
        parse_factor(value).ok_or_else(|| self.invalid(row, column, value))
    }

    fn mileage(&self, row: &RawRow, column: &str, bound: MileageBound) -> Result<i64, LoadError> {
        let value = self.field(row, column)?;
        parse_mileage(value, bound).ok_or_else(|| self.invalid(row, column, value))
    }
}

/// Open a source file, distinguishing a missing file from other IO failures
fn open(path: &Path, source: Source, observer: &dyn ImportObserver) -> Result<File, LoadError> {
    observer.notify(ImportEvent::LoadStarted {
        source,
        path: path.to_path_buf(),
    });
    if !path.exists() {
        return Err(LoadError::NotFound { path: path.to_path_buf() });
    }
    File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the region factor file (`REGION1`, `REGION_FACTOR`)
pub fn load_region_factors<P: AsRef<Path>>(
    path: P,
    observer: &dyn ImportObserver,
) -> Result<RegionFactors, LoadError> {
    let path = path.as_ref();
    let file = open(path, Source::RegionFactors, observer)?;
    read_region_factors(file, path, observer)
}

/// Load region factors from any reader
pub fn region_factors_from_reader<R: Read>(
    reader: R,
    observer: &dyn ImportObserver,
) -> Result<RegionFactors, LoadError> {
    read_region_factors(reader, Path::new(READER_LABEL), observer)
}

fn read_region_factors<R: Read>(
    reader: R,
    path: &Path,
    observer: &dyn ImportObserver,
) -> Result<RegionFactors, LoadError> {
    let table = CsvTable::read(reader, path, &[REGION_COLUMN, REGION_FACTOR_COLUMN])?;

    let mut factors = RegionFactors::new();
    for row in &table.rows {
        let region = table.text(row, REGION_COLUMN)?;
        let factor = table.factor(row, REGION_FACTOR_COLUMN)?;
        if !factors.insert(region.clone(), factor) {
            observer.notify(ImportEvent::DuplicateKey {
                source: Source::RegionFactors,
                key: region,
            });
        }
    }

    observer.notify(ImportEvent::Loaded {
        source: Source::RegionFactors,
        records: factors.len(),
    });
    Ok(factors)
}

/// Load the headerless postcode file.
///
/// Rows without a region label or without an extractable 5-digit postcode
/// are dropped and counted; they do not fail the load.
pub fn load_postcodes<P: AsRef<Path>>(
    path: P,
    columns: PostcodeColumns,
    observer: &dyn ImportObserver,
) -> Result<PostcodeSet, LoadError> {
    let path = path.as_ref();
    let file = open(path, Source::Postcodes, observer)?;
    read_postcodes(file, path, columns, observer)
}

/// Load postcodes from any reader
pub fn postcodes_from_reader<R: Read>(
    reader: R,
    columns: PostcodeColumns,
    observer: &dyn ImportObserver,
) -> Result<PostcodeSet, LoadError> {
    read_postcodes(reader, Path::new(READER_LABEL), columns, observer)
}

fn read_postcodes<R: Read>(
    reader: R,
    path: &Path,
    columns: PostcodeColumns,
    observer: &dyn ImportObserver,
) -> Result<PostcodeSet, LoadError> {
    let rows = read_rows(reader, path)?;
    if rows.is_empty() {
        return Err(LoadError::Empty { path: path.to_path_buf() });
    }

    let widest = rows.iter().map(|row| row.fields.len()).max().unwrap_or(0);
    if widest < columns.required_width() {
        return Err(LoadError::TooFewColumns {
            path: path.to_path_buf(),
            required: columns.required_width(),
            found: widest,
        });
    }

    let mut set = PostcodeSet::default();
    for row in &rows {
        let region = row.fields.get(columns.region).map(|raw| clean_field(raw));
        let field = row.fields.get(columns.postcode).map(|raw| raw.trim());

        let record = match (region, field) {
            (Some(region), Some(field)) if !region.is_empty() => {
                extract_postcode(field).map(|postcode| PostcodeRecord::new(region, postcode))
            }
            _ => None,
        };

        match record {
            Some(record) => set.records.push(record),
            None => {
                set.dropped += 1;
                observer.notify(ImportEvent::RowDropped {
                    source: Source::Postcodes,
                    line: row.line,
                    field: field.unwrap_or_default().to_string(),
                });
            }
        }
    }

    if set.dropped > 0 {
        observer.notify(ImportEvent::RowsDropped {
            source: Source::Postcodes,
            dropped: set.dropped,
        });
    }
    observer.notify(ImportEvent::Loaded {
        source: Source::Postcodes,
        records: set.records.len(),
    });
    Ok(set)
}

/// Load the vehicle factor file (`VEHICLE_TYPE`, `VEHICLE_FACTOR`).
///
/// Duplicates are kept; reconciliation takes the first factor per type.
pub fn load_vehicle_factors<P: AsRef<Path>>(
    path: P,
    observer: &dyn ImportObserver,
) -> Result<Vec<VehicleFactorRecord>, LoadError> {
    let path = path.as_ref();
    let file = open(path, Source::VehicleFactors, observer)?;
    read_vehicle_factors(file, path, observer)
}

/// Load vehicle factors from any reader
pub fn vehicle_factors_from_reader<R: Read>(
    reader: R,
    observer: &dyn ImportObserver,
) -> Result<Vec<VehicleFactorRecord>, LoadError> {
    read_vehicle_factors(reader, Path::new(READER_LABEL), observer)
}

fn read_vehicle_factors<R: Read>(
    reader: R,
    path: &Path,
    observer: &dyn ImportObserver,
) -> Result<Vec<VehicleFactorRecord>, LoadError> {
    let table = CsvTable::read(reader, path, &[VEHICLE_TYPE_COLUMN, VEHICLE_FACTOR_COLUMN])?;

    let records = table
        .rows
        .iter()
        .map(|row| {
            Ok(VehicleFactorRecord {
                vehicle_type: table.text(row, VEHICLE_TYPE_COLUMN)?,
                factor: table.factor(row, VEHICLE_FACTOR_COLUMN)?,
            })
        })
        .collect::<Result<Vec<_>, LoadError>>()?;

    observer.notify(ImportEvent::Loaded {
        source: Source::VehicleFactors,
        records: records.len(),
    });
    Ok(records)
}

/// Load the yearly mileage factor file
/// (`YEARLY_MILEAGE_FROM`, `YEARLY_MILEAGE_TO`, `FACTOR`)
pub fn load_yearly_mileage_factors<P: AsRef<Path>>(
    path: P,
    observer: &dyn ImportObserver,
) -> Result<Vec<YearlyMileageRecord>, LoadError> {
    let path = path.as_ref();
    let file = open(path, Source::YearlyMileageFactors, observer)?;
    read_yearly_mileage_factors(file, path, observer)
}

/// Load yearly mileage factors from any reader
pub fn yearly_mileage_factors_from_reader<R: Read>(
    reader: R,
    observer: &dyn ImportObserver,
) -> Result<Vec<YearlyMileageRecord>, LoadError> {
    read_yearly_mileage_factors(reader, Path::new(READER_LABEL), observer)
}

fn read_yearly_mileage_factors<R: Read>(
    reader: R,
    path: &Path,
    observer: &dyn ImportObserver,
) -> Result<Vec<YearlyMileageRecord>, LoadError> {
    let table = CsvTable::read(
        reader,
        path,
        &[MILEAGE_FROM_COLUMN, MILEAGE_TO_COLUMN, MILEAGE_FACTOR_COLUMN],
    )?;

    let records = table
        .rows
        .iter()
        .map(|row| {
            Ok(YearlyMileageRecord {
                mileage_from: table.mileage(row, MILEAGE_FROM_COLUMN, MileageBound::From)?,
                mileage_to: table.mileage(row, MILEAGE_TO_COLUMN, MileageBound::To)?,
                factor: table.factor(row, MILEAGE_FACTOR_COLUMN)?,
            })
        })
        .collect::<Result<Vec<_>, LoadError>>()?;

    observer.notify(ImportEvent::Loaded {
        source: Source::YearlyMileageFactors,
        records: records.len(),
    });
    Ok(records)
}
