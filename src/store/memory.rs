//! In-memory store
//!
//! Behaves like a single database session: uncommitted work lives in a
//! working copy, savepoints are snapshots of it, and unique keys plus the
//! postcode to region foreign key are enforced on insert. Failures can be
//! injected per key value to exercise error isolation.

use super::{columns, Field, Store, StoreError, Table, Value};
use std::collections::{BTreeMap, HashSet};

/// A persisted row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub values: Vec<Field>,
}

impl StoredRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    fn matches(&self, key: &[Field]) -> bool {
        key.iter()
            .all(|(column, value)| self.get(column) == Some(value))
    }
}

#[derive(Debug, Clone, Default)]
struct TableData {
    last_id: i64,
    rows: Vec<StoredRow>,
}

type Tables = BTreeMap<Table, TableData>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: Tables,
    working: Tables,
    savepoints: Vec<Tables>,
    faults: Vec<(Table, Value)>,
    failing_fetches: HashSet<Table>,
    inserts: usize,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every lookup or insert on `table` that involves `value` fail
    pub fn fail_on(&mut self, table: Table, value: impl Into<Value>) {
        self.faults.push((table, value.into()));
    }

    /// Make [`Store::fetch_all`] on `table` fail
    pub fn fail_fetch(&mut self, table: Table) {
        self.failing_fetches.insert(table);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
        self.failing_fetches.clear();
    }

    /// Rows visible inside the current transaction
    pub fn rows(&self, table: Table) -> &[StoredRow] {
        self.working
            .get(&table)
            .map(|data| data.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Rows as of the last commit
    pub fn committed_rows(&self, table: Table) -> &[StoredRow] {
        self.committed
            .get(&table)
            .map(|data| data.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Successful insert calls so far, including ones later rolled back
    pub fn inserts(&self) -> usize {
        self.inserts
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    fn check_faults(&self, table: Table, fields: &[Field]) -> Result<(), StoreError> {
        let injected = self.faults.iter().any(|(fault_table, fault_value)| {
            *fault_table == table && fields.iter().any(|(_, value)| value == fault_value)
        });
        if injected {
            return Err(StoreError::Query {
                table: table.name(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn check_constraints(&self, table: Table, row: &[Field]) -> Result<(), StoreError> {
        let key: Vec<Field> = table
            .unique_key()
            .iter()
            .filter_map(|column| {
                row.iter()
                    .find(|(name, _)| name == column)
                    .map(|(name, value)| (*name, value.clone()))
            })
            .collect();

        if key.len() != table.unique_key().len() {
            return Err(StoreError::Constraint {
                table: table.name(),
                message: format!("missing key columns {:?}", table.unique_key()),
            });
        }
        if self.rows(table).iter().any(|existing| existing.matches(&key)) {
            return Err(StoreError::Constraint {
                table: table.name(),
                message: format!("duplicate key {}", super::describe_key(&key)),
            });
        }

        if table == Table::Postcodes {
            let region_id = row
                .iter()
                .find(|(name, _)| *name == columns::REGION_ID)
                .map(|(_, value)| value);
            let known = match region_id {
                Some(Value::Int(id)) => self.rows(Table::Regions).iter().any(|r| r.id == *id),
                _ => false,
            };
            if !known {
                return Err(StoreError::Constraint {
                    table: table.name(),
                    message: format!("region_id {:?} does not reference a region", region_id),
                });
            }
        }

        Ok(())
    }
}

impl Store for MemoryStore {
    fn find_by_key(&mut self, table: Table, key: &[Field]) -> Result<Option<i64>, StoreError> {
        self.check_faults(table, key)?;
        Ok(self
            .rows(table)
            .iter()
            .find(|row| row.matches(key))
            .map(|row| row.id))
    }

    fn insert(&mut self, table: Table, row: &[Field]) -> Result<i64, StoreError> {
        self.check_faults(table, row)?;
        self.check_constraints(table, row)?;

        let data = self.working.entry(table).or_default();
        data.last_id += 1;
        let id = data.last_id;
        data.rows.push(StoredRow {
            id,
            values: row.to_vec(),
        });
        self.inserts += 1;
        Ok(id)
    }

    fn fetch_all(
        &mut self,
        table: Table,
        column: &'static str,
    ) -> Result<HashSet<String>, StoreError> {
        if self.failing_fetches.contains(&table) {
            return Err(StoreError::Query {
                table: table.name(),
                message: "injected failure".to_string(),
            });
        }
        Ok(self
            .rows(table)
            .iter()
            .filter_map(|row| row.get(column))
            .map(|value| value.to_string())
            .collect())
    }

    fn savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.push(self.working.clone());
        Ok(())
    }

    fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.pop().map(|_| ()).ok_or(StoreError::NoSavepoint)
    }

    fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        self.working = self.savepoints.pop().ok_or(StoreError::NoSavepoint)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.committed = self.working.clone();
        self.savepoints.clear();
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.working = self.committed.clone();
        self.savepoints.clear();
        Ok(())
    }
}
