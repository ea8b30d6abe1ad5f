use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Invalid dataset prefix '{0}'")]
    InvalidPrefix(String),

    #[error("Failed to create dataset directory '{0}'")]
    DirectoryCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to list dataset directory '{0}'")]
    DirectoryRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to read metadata for snapshot file '{0}'")]
    Metadata(PathBuf, #[source] std::io::Error),

    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Transfer from {0} did not complete")]
    Transfer(String, #[source] std::io::Error),

    #[error("Failed to store data fetched from {0}")]
    SinkWrite(String, #[source] std::io::Error),

    #[error("Failed to open source file '{0}'")]
    SourceOpen(PathBuf, #[source] std::io::Error),

    #[error("Failed to write staging file in '{0}'")]
    Staging(PathBuf, #[source] std::io::Error),

    #[error("Failed to move staged file into place at '{0}'")]
    Commit(PathBuf, #[source] std::io::Error),

    #[error("Failed to compress snapshot '{0}'")]
    Compression(PathBuf, #[source] std::io::Error),

    #[error("Failed to read '{0}' for integrity check")]
    ValidationRead(PathBuf, #[source] std::io::Error),

    #[error("Snapshot '{original}' failed the integrity check and was quarantined as '{quarantine}'")]
    Quarantined {
        original: PathBuf,
        quarantine: PathBuf,
    },

    #[error("Failed to quarantine snapshot '{0}'")]
    QuarantineRename(PathBuf, #[source] std::io::Error),

    #[error("Raw snapshot '{0}' is missing, nothing to seal")]
    RawMissing(PathBuf),

    #[error("Failed to remove '{0}'")]
    Remove(PathBuf, #[source] std::io::Error),

    #[error("Failed to read canonical pointer '{0}'")]
    PointerRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to repoint canonical pointer '{0}'")]
    PointerWrite(PathBuf, #[source] std::io::Error),

    #[error("Canonical pointer '{pointer}' references missing file '{target}'")]
    DanglingPointer { pointer: PathBuf, target: String },

    #[error("Failed to open snapshot '{0}'")]
    Open(PathBuf, #[source] std::io::Error),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
