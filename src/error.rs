//! Error types for loading factor files and running an import
//!
//! Loader errors are fatal for the category whose file failed. Store errors
//! are either isolated to one key (inside reconciliation) or fatal for the
//! whole run (connection and commit).

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`LoadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    NotFound,
    Empty,
    SchemaInvalid,
    TypeInvalid,
    Unreadable,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("input file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("input file is empty: {}", path.display())]
    Empty { path: PathBuf },

    #[error("Missing required columns in {}: {}", path.display(), missing.join(", "))]
    MissingColumns { path: PathBuf, missing: Vec<String> },

    #[error("{} has {found} columns, at least {required} are required", path.display())]
    TooFewColumns {
        path: PathBuf,
        required: usize,
        found: usize,
    },

    #[error("invalid value {value:?} in column {column} at line {line} of {}", path.display())]
    InvalidValue {
        path: PathBuf,
        column: String,
        line: u64,
        value: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            LoadError::NotFound { .. } => LoadErrorKind::NotFound,
            LoadError::Empty { .. } => LoadErrorKind::Empty,
            LoadError::MissingColumns { .. } | LoadError::TooFewColumns { .. } => {
                LoadErrorKind::SchemaInvalid
            }
            LoadError::InvalidValue { .. } => LoadErrorKind::TypeInvalid,
            LoadError::Io { .. } | LoadError::Csv { .. } => LoadErrorKind::Unreadable,
        }
    }
}

/// Failure of one import category
#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
