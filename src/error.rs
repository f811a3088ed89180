//! Error types and converters.

use std::fmt;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::metadata::PackageId;

/// A protocol-level verification failure.
///
/// These are the recoverable failures: the update driver records them,
/// refreshes the root metadata on the hypothesis that the local root is
/// stale, and retries the interrupted iteration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    /// The document did not carry enough valid signatures from authorized
    /// keys to meet the role's threshold.
    #[error("signature threshold not met")]
    Signatures,

    /// The document's version went backwards relative to trusted state.
    #[error("version rollback: offered version {new} is older than trusted version {prior}")]
    Version {
        /// The minimum acceptable version.
        prior: u64,
        /// The version the remote offered.
        new: u64,
    },

    /// The document expired before the supplied wall-clock time.
    #[error("metadata expired at {expires}")]
    Expired {
        /// The document's expiry time.
        expires: DateTime<Utc>,
    },

    /// A downloaded file did not match its signed length and hashes.
    #[error("file info mismatch for {0}")]
    FileInfo(String),

    /// A target path was not listed in the signed metadata covering it.
    #[error("target {0} not listed in signed metadata")]
    UnknownTarget(String),

    /// A signed document could not be decoded.
    #[error("could not decode {path}: {cause}")]
    Deserialization {
        /// The remote or cache path of the undecodable document.
        path: String,
        /// What went wrong.
        cause: String,
    },
}

/// One reason an update iteration was aborted and retried.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateInterruption {
    /// A sub-step failed verification.
    Verification(VerificationError),
    /// The root metadata was replaced mid-flow.
    RootUpdated,
}

impl fmt::Display for UpdateInterruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateInterruption::Verification(e) => write!(f, "{}", e),
            UpdateInterruption::RootUpdated => f.write_str("root updated"),
        }
    }
}

/// The record of every aborted iteration within one update call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationHistory {
    entries: Vec<UpdateInterruption>,
}

impl VerificationHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        VerificationHistory {
            entries: Vec::new(),
        }
    }

    /// Record why an iteration was aborted.
    pub fn record(&mut self, interruption: UpdateInterruption) {
        self.entries.push(interruption);
    }

    /// The recorded interruptions, oldest first.
    pub fn entries(&self) -> &[UpdateInterruption] {
        &self.entries
    }

    /// The number of aborted iterations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether anything was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for VerificationHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} aborted attempts", self.entries.len())?;
        for (nr, entry) in self.entries.iter().enumerate() {
            write!(f, "; attempt {}: {}", nr + 1, entry)?;
        }
        Ok(())
    }
}

/// Error type for all repository client errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A metadata document or downloaded file failed verification.
    #[error("verification failure: {0}")]
    Verification(#[from] VerificationError),

    /// The update did not converge within the bounded number of retries.
    /// This is what a sustained attack (e.g. an endless stream of root
    /// rotations) looks like from the outside.
    #[error("update did not converge: {0}")]
    VerificationLoop(VerificationHistory),

    /// The root metadata was replaced; the in-flight update must restart
    /// before any staged files are committed.
    #[error("root metadata updated, update must restart")]
    RootUpdated,

    /// The package is not known to the cached index.
    #[error("unknown package {0}")]
    InvalidPackage(PackageId),

    /// An entry inside the package index could not be used. This indicates
    /// broken local state (or a broken repository), not an attack, and is
    /// never retried.
    #[error("invalid file {entry} in package index: {cause}")]
    InvalidFileInIndex {
        /// The path of the entry inside the index archive.
        entry: String,
        /// What went wrong.
        cause: String,
    },

    /// A file in the local cache violated an invariant. Never retried.
    #[error("local file corrupted: {0}")]
    LocalFileCorrupted(String),

    /// The remote repository could not serve a request.
    #[error("remote: {0}")]
    Remote(String),

    /// There was a problem encoding or decoding.
    #[error("encoding: {0}")]
    Encoding(String),

    /// An illegal argument was passed into a function.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Opaque error type, to be interpreted similar to HTTP 500. Something
    /// went wrong, and you may or may not be able to do anything about it.
    #[error("opaque: {0}")]
    Opaque(String),
}

impl Error {
    /// Helper to include the path that caused the error for FS I/O errors.
    pub fn from_io(err: &io::Error, path: &Path) -> Error {
        Error::Opaque(format!("Path {:?} : {:?}", path, err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Opaque(format!("IO: {:?}", err))
    }
}

impl From<serde_json::error::Error> for Error {
    fn from(err: serde_json::error::Error) -> Error {
        Error::Encoding(format!("JSON: {:?}", err))
    }
}

impl From<data_encoding::DecodeError> for Error {
    fn from(err: data_encoding::DecodeError) -> Error {
        Error::Encoding(format!("{:?}", err))
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Error {
        Error::Opaque(format!("Error persisting temp file: {:?}", err))
    }
}
