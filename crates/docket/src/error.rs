//! Error types for the intake pipeline

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for a single pipeline run or a watch session.
#[derive(Error, Debug)]
pub enum DocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Lock error: {0}")]
    Lock(#[from] crate::lock::LockError),

    #[error("Failed to rename {from} -> {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create destination directory {dir}: {source}")]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to move {from} -> {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Failures opening a document for page access.
#[derive(Error, Debug)]
pub enum OpenError {
    /// The file exists but is not (yet) a readable document, typically because
    /// the producer is still writing it. Retried by the extractor.
    #[error("file data error: {0}")]
    FileData(String),

    #[error("document not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to open document: {0}")]
    Other(String),
}

/// Failure of an external capability (render or decode) on a single page.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("`{tool}` not found; install it or set {env_var}")]
    ToolMissing { tool: String, env_var: &'static str },

    #[error("`{tool}` exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Hard failures of token extraction (the document could not be opened).
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("gave up opening {path} after {attempts} attempts: {last}")]
    OpenExhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        last: OpenError,
    },

    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: OpenError,
    },
}

/// Failures loading or persisting the hash ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger {path} is not a JSON object of path -> digest: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, DocketError>;
