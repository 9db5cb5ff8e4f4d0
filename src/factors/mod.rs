//! Pricing factor records and the CSV loaders that produce them

mod normalize;
pub mod loader;

pub use normalize::{clean_field, extract_postcode, parse_factor, parse_mileage, MileageBound};
pub use loader::{
    load_postcodes, load_region_factors, load_vehicle_factors, load_yearly_mileage_factors,
    postcodes_from_reader, region_factors_from_reader, vehicle_factors_from_reader,
    yearly_mileage_factors_from_reader,
};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Stored upper bound for an open-ended mileage band (`-1` in the source file)
pub const UNBOUNDED_MILEAGE: i64 = 100_000_000;

/// Factor given to a region that has no entry in the region factor file
pub const DEFAULT_REGION_FACTOR: f64 = 1.0;

/// The four input files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    RegionFactors,
    Postcodes,
    VehicleFactors,
    YearlyMileageFactors,
}

impl Source {
    /// File name looked up inside the data directory
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Source::RegionFactors => "region_factor_mapping.csv",
            Source::Postcodes => "postcodes.csv",
            Source::VehicleFactors => "vehicle_factor_mapping.csv",
            Source::YearlyMileageFactors => "yearly_mileage_factor_mapping.csv",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::RegionFactors => "region factors",
            Source::Postcodes => "postcodes",
            Source::VehicleFactors => "vehicle factors",
            Source::YearlyMileageFactors => "yearly mileage factors",
        };
        f.write_str(name)
    }
}

/// Region name to factor lookup, loaded once per run and read-only afterwards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionFactors {
    factors: HashMap<String, f64>,
}

impl RegionFactors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the factor of a region. A repeated region takes the later factor.
    /// Returns false when the region was already present.
    pub fn insert(&mut self, region: impl Into<String>, factor: f64) -> bool {
        self.factors.insert(region.into(), factor).is_none()
    }

    pub fn get(&self, region: &str) -> Option<f64> {
        self.factors.get(region).copied()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for RegionFactors {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut factors = RegionFactors::new();
        for (region, factor) in iter {
            factors.insert(region, factor);
        }
        factors
    }
}

/// One region/postcode pair from the postcode file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostcodeRecord {
    pub region: String,
    /// Exactly five ASCII digits
    pub postcode: String,
}

impl PostcodeRecord {
    pub fn new(region: impl Into<String>, postcode: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            postcode: postcode.into(),
        }
    }
}

/// Normalized postcode file plus the number of rows that were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostcodeSet {
    pub records: Vec<PostcodeRecord>,
    pub dropped: usize,
}

/// Positions of the region label and postcode in the headerless postcode file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostcodeColumns {
    pub region: usize,
    pub postcode: usize,
}

impl PostcodeColumns {
    /// Minimum number of columns the file must have
    pub fn required_width(&self) -> usize {
        self.region.max(self.postcode) + 1
    }
}

impl Default for PostcodeColumns {
    fn default() -> Self {
        Self { region: 2, postcode: 6 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleFactorRecord {
    pub vehicle_type: String,
    pub factor: f64,
}

/// One yearly mileage band `[mileage_from, mileage_to]` and its factor
#[derive(Debug, Clone, PartialEq)]
pub struct YearlyMileageRecord {
    pub mileage_from: i64,
    pub mileage_to: i64,
    pub factor: f64,
}

impl YearlyMileageRecord {
    pub fn is_unbounded(&self) -> bool {
        self.mileage_to == UNBOUNDED_MILEAGE
    }

    pub fn range(&self) -> (i64, i64) {
        (self.mileage_from, self.mileage_to)
    }
}
