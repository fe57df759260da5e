//! Error types of the flux driver.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while building the file chain. The driver stays unloaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no flux files matched the patterns {patterns:?}")]
    NoFilesResolved { patterns: Vec<String> },

    #[error("the flux file chain contains no entries")]
    NoEntries,

    #[error("requested branch '{branch}' is absent from every flux file")]
    MissingBranch { branch: String },

    #[error("flux file {path} has no 'entry' table")]
    MissingEntryTable { path: PathBuf },

    #[error("unknown branch '{0}' in branch request (expected entry, numi or aux)")]
    UnknownBranch(String),

    #[error("failed to read flux file {path}: {source}")]
    Store {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("invalid file pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// The driver was asked to do something its configuration cannot support.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("flux neutrino energy {energy} exceeds the declared maximum energy {cap}")]
    EnergyExceedsCap { energy: f64, cap: f64 },

    #[error("entry reuse count must be at least 1, got {0}")]
    InvalidEntryReuse(u64),

    #[error("maximum energy must be positive, got {0}")]
    InvalidMaxEnergy(f64),

    #[error("no entry in a full pass over {entries} entries matches the flux particles {particles}")]
    NoAcceptableSpecies { entries: u64, particles: String },

    #[error("failed to parse configuration {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FluxError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("no flux files loaded")]
    NotLoaded,

    #[error("entry {index} is outside the chain of {total} entries")]
    IndexOutOfRange { index: u64, total: u64 },

    #[error("failed to read entry {index} from {path}: {source}")]
    Store {
        index: u64,
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("failed to write flux file {path}: {source}")]
    Write {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("cannot encode column {column} for {path}: {reason}")]
    Encode {
        path: PathBuf,
        column: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, FluxError>;
