//! Boundary to the relational store holding the factor lookup tables
//!
//! The importer only needs a handful of capabilities: look a row up by its
//! key, insert a row and get its id back, read one column of a whole table,
//! and scope work with savepoints inside a single run-wide transaction.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{MemoryStore, StoredRow};
#[cfg(feature = "postgres")]
pub use postgres::{DbConfig, PgStore};

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Column names of the persisted tables
pub mod columns {
    pub const ID: &str = "id";
    pub const REGION: &str = "region";
    pub const REGION_FACTOR: &str = "region_factor";
    pub const REGION_ID: &str = "region_id";
    pub const POSTCODE: &str = "postcode";
    pub const VEHICLE_TYPE: &str = "vehicle_type";
    pub const VEHICLE_FACTOR: &str = "vehicle_factor";
    pub const YEARLY_MILEAGE_FROM: &str = "yearly_mileage_from";
    pub const YEARLY_MILEAGE_TO: &str = "yearly_mileage_to";
    pub const YEARLY_MILEAGE_FACTOR: &str = "yearly_mileage_factor";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Regions,
    Postcodes,
    Vehicle,
    YearlyMileage,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Regions => "regions",
            Table::Postcodes => "postcodes",
            Table::Vehicle => "vehicle",
            Table::YearlyMileage => "yearly_mileage",
        }
    }

    /// Columns that together must be unique
    pub fn unique_key(&self) -> &'static [&'static str] {
        match self {
            Table::Regions => &[columns::REGION],
            Table::Postcodes => &[columns::POSTCODE],
            Table::Vehicle => &[columns::VEHICLE_TYPE],
            Table::YearlyMileage => &[columns::YEARLY_MILEAGE_FROM, columns::YEARLY_MILEAGE_TO],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A key or row value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => f.write_str(text),
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
        }
    }
}

/// A column name paired with its value
pub type Field = (&'static str, Value);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connection(String),

    #[error("query on {table} failed: {message}")]
    Query { table: &'static str, message: String },

    #[error("constraint violated on {table}: {message}")]
    Constraint { table: &'static str, message: String },

    #[error("no savepoint is active")]
    NoSavepoint,

    #[error("transaction is already closed")]
    Closed,

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Transactional row store used by the reconcilers.
///
/// All calls run inside one transaction opened when the store was created.
/// Nothing is visible to other sessions before [`Store::commit`].
pub trait Store {
    /// Id of the row whose columns equal `key`, if any
    fn find_by_key(&mut self, table: Table, key: &[Field]) -> Result<Option<i64>, StoreError>;

    /// Insert a row and return its generated id
    fn insert(&mut self, table: Table, row: &[Field]) -> Result<i64, StoreError>;

    /// Every value of one column, rendered as text
    fn fetch_all(&mut self, table: Table, column: &'static str)
        -> Result<HashSet<String>, StoreError>;

    /// Mark a point that [`Store::rollback_to_savepoint`] can return to
    fn savepoint(&mut self) -> Result<(), StoreError>;

    /// Keep everything since the last savepoint
    fn release_savepoint(&mut self) -> Result<(), StoreError>;

    /// Discard everything since the last savepoint
    fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Render a key for log messages, e.g. `5001 - 10000`
pub fn describe_key(key: &[Field]) -> String {
    key.iter()
        .map(|(_, value)| value.to_string())
        .collect::<Vec<_>>()
        .join(" - ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(Table::Regions.to_string(), "regions");
        assert_eq!(Table::YearlyMileage.name(), "yearly_mileage");
        assert_eq!(Table::YearlyMileage.unique_key().len(), 2);
    }

    #[test]
    fn test_describe_key() {
        let key = [
            (columns::YEARLY_MILEAGE_FROM, Value::Int(5001)),
            (columns::YEARLY_MILEAGE_TO, Value::Int(10000)),
        ];
        assert_eq!(describe_key(&key), "5001 - 10000");
        assert_eq!(describe_key(&[(columns::VEHICLE_TYPE, "SUV".into())]), "SUV");
    }
}
