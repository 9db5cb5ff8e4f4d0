//! PostgreSQL store
//!
//! Holds one connection and one transaction for the whole run. The async
//! `sqlx` driver is run to completion on an owned current-thread runtime so
//! the importer itself stays synchronous. Dropping the store without
//! committing rolls the transaction back.

use super::{columns, Field, Store, StoreError, Table, Value};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::fmt;
use tokio::runtime::{Builder, Runtime};

const SAVEPOINT: &str = "factor_import_key";

/// Connection parameters
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl DbConfig {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

pub struct PgStore {
    runtime: Runtime,
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStore {
    /// Connect and open the run-wide transaction
    pub fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let (pool, tx) = runtime
            .block_on(async {
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(config.connect_options())
                    .await?;
                let tx = pool.begin().await?;
                Ok::<_, sqlx::Error>((pool, tx))
            })
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        log::info!(
            "Connection to {} at {}:{} established",
            config.database,
            config.host,
            config.port
        );
        Ok(Self {
            runtime,
            pool,
            tx: Some(tx),
        })
    }

    /// Create the four lookup tables if they do not exist yet
    pub fn ensure_schema(&mut self) -> Result<(), StoreError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS regions (
                id SERIAL PRIMARY KEY,
                region TEXT NOT NULL UNIQUE,
                region_factor DOUBLE PRECISION NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS postcodes (
                id SERIAL PRIMARY KEY,
                region_id INTEGER NOT NULL REFERENCES regions(id),
                postcode VARCHAR(5) NOT NULL UNIQUE
            )",
            "CREATE TABLE IF NOT EXISTS vehicle (
                id SERIAL PRIMARY KEY,
                vehicle_type TEXT NOT NULL UNIQUE,
                vehicle_factor DOUBLE PRECISION NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS yearly_mileage (
                id SERIAL PRIMARY KEY,
                yearly_mileage_from INTEGER NOT NULL,
                yearly_mileage_to INTEGER NOT NULL,
                yearly_mileage_factor DOUBLE PRECISION NOT NULL,
                UNIQUE (yearly_mileage_from, yearly_mileage_to)
            )",
        ];
        for statement in statements {
            self.execute(statement)?;
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        let Self { runtime, tx, .. } = self;
        let tx = tx.as_mut().ok_or(StoreError::Closed)?;
        runtime.block_on(sqlx::query(sql).execute(&mut **tx))?;
        Ok(())
    }

    fn finish(&mut self, commit: bool) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Closed)?;
        let result = if commit {
            self.runtime.block_on(tx.commit())
        } else {
            self.runtime.block_on(tx.rollback())
        };
        self.runtime.block_on(self.pool.close());
        result.map_err(StoreError::from)
    }
}

impl Drop for PgStore {
    fn drop(&mut self) {
        // The pooled connection must be returned inside the runtime
        if let Some(tx) = self.tx.take() {
            if let Err(err) = self.runtime.block_on(tx.rollback()) {
                log::warn!("Rollback on drop failed: {}", err);
            }
            self.runtime.block_on(self.pool.close());
        }
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    fields: &[Field],
) -> Query<'q, Postgres, PgArguments> {
    for (_, value) in fields {
        query = match value {
            Value::Text(text) => query.bind(text.clone()),
            Value::Int(number) => query.bind(*number),
            Value::Float(number) => query.bind(*number),
        };
    }
    query
}

/// `a = $1 AND b = $2`
fn where_clause(key: &[Field]) -> String {
    key.iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = ${}", column, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl Store for PgStore {
    fn find_by_key(&mut self, table: Table, key: &[Field]) -> Result<Option<i64>, StoreError> {
        // Ids may be SERIAL (int4); cast so decoding is uniform
        let sql = format!(
            "SELECT {}::BIGINT FROM {} WHERE {}",
            columns::ID,
            table.name(),
            where_clause(key)
        );
        let Self { runtime, tx, .. } = self;
        let tx = tx.as_mut().ok_or(StoreError::Closed)?;
        let row = runtime.block_on(bind_all(sqlx::query(&sql), key).fetch_optional(&mut **tx))?;
        row.map(|row| row.try_get::<i64, _>(0))
            .transpose()
            .map_err(StoreError::from)
    }

    fn insert(&mut self, table: Table, row: &[Field]) -> Result<i64, StoreError> {
        let names: Vec<&str> = row.iter().map(|(column, _)| *column).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}::BIGINT",
            table.name(),
            names.join(", "),
            placeholders.join(", "),
            columns::ID
        );
        let Self { runtime, tx, .. } = self;
        let tx = tx.as_mut().ok_or(StoreError::Closed)?;
        let inserted = runtime.block_on(bind_all(sqlx::query(&sql), row).fetch_one(&mut **tx))?;
        Ok(inserted.try_get::<i64, _>(0)?)
    }

    fn fetch_all(
        &mut self,
        table: Table,
        column: &'static str,
    ) -> Result<HashSet<String>, StoreError> {
        let sql = format!(
            "SELECT {}::TEXT FROM {} WHERE {} IS NOT NULL",
            column,
            table.name(),
            column
        );
        let Self { runtime, tx, .. } = self;
        let tx = tx.as_mut().ok_or(StoreError::Closed)?;
        let rows = runtime.block_on(sqlx::query(&sql).fetch_all(&mut **tx))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(StoreError::from))
            .collect()
    }

    fn savepoint(&mut self) -> Result<(), StoreError> {
        self.execute(&format!("SAVEPOINT {}", SAVEPOINT))
    }

    fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.execute(&format!("RELEASE SAVEPOINT {}", SAVEPOINT))
    }

    fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT))
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.finish(true)
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.finish(false)
    }
}
