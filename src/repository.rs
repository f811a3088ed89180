//! The remote-repository collaborator interface.
//!
//! The client core never talks to a transport directly. It describes what
//! it wants as a [`RemoteFile`], and a [`RemoteRepository`] implementation
//! downloads the artifact into a [`StagedFile`]: a temporary file that
//! supports hash verification and promotion into the cache, and that is
//! deleted on drop if it is never promoted.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Error;
use crate::metadata::{FileFormat, FileInfo, MirrorsMetadata, Role};
use crate::verify;
use crate::Result;

/// A remote artifact the update driver wants fetched.
///
/// Each descriptor carries the size bound the transport must enforce:
/// the signed length when the artifact is described by trusted metadata,
/// or a configured ceiling when it is not. This is the defence against
/// endless-data responses.
#[derive(Debug, Clone)]
pub enum RemoteFile {
    /// The root metadata. Its description is only known when a snapshot
    /// announced the rotation.
    Root {
        /// The expected description, if a trusted snapshot provided one.
        info: Option<FileInfo>,
        /// Fallback size bound when no description is available.
        max_size: u64,
    },
    /// The timestamp metadata. Never described by other metadata.
    Timestamp {
        /// Configured size bound.
        max_size: u64,
    },
    /// The snapshot metadata, described by the new timestamp.
    Snapshot {
        /// The expected description.
        info: FileInfo,
    },
    /// The mirrors metadata, described by the new snapshot.
    Mirrors {
        /// The expected description.
        info: FileInfo,
    },
    /// The package index, in whichever published encoding the fetcher can
    /// deliver. Gzip is preferred.
    Index {
        /// Description of the uncompressed index, if published.
        plain: Option<FileInfo>,
        /// Description of the gzipped index, if published.
        gzip: Option<FileInfo>,
    },
    /// A package tarball, described by its targets document.
    Package {
        /// Repository-relative path of the tarball.
        path: String,
        /// The expected description.
        info: FileInfo,
    },
}

/// One concrete remote path a [`RemoteFile`] may be served from.
#[derive(Debug, Clone)]
pub struct RemoteCandidate {
    /// The encoding delivered when this candidate is used.
    pub format: FileFormat,
    /// The repository-relative path.
    pub path: String,
    /// The maximum number of bytes the transport may accept.
    pub size_bound: u64,
}

impl RemoteFile {
    /// The concrete paths this file may be served from, most preferred
    /// first.
    pub fn candidates(&self) -> Vec<RemoteCandidate> {
        match self {
            RemoteFile::Root { info, max_size } => vec![RemoteCandidate {
                format: FileFormat::Plain,
                path: Role::Root.file_name().to_string(),
                size_bound: info.as_ref().map(FileInfo::length).unwrap_or(*max_size),
            }],
            RemoteFile::Timestamp { max_size } => vec![RemoteCandidate {
                format: FileFormat::Plain,
                path: Role::Timestamp.file_name().to_string(),
                size_bound: *max_size,
            }],
            RemoteFile::Snapshot { info } => vec![RemoteCandidate {
                format: FileFormat::Plain,
                path: Role::Snapshot.file_name().to_string(),
                size_bound: info.length(),
            }],
            RemoteFile::Mirrors { info } => vec![RemoteCandidate {
                format: FileFormat::Plain,
                path: Role::Mirrors.file_name().to_string(),
                size_bound: info.length(),
            }],
            RemoteFile::Index { plain, gzip } => {
                let mut candidates = Vec::new();
                if let Some(info) = gzip {
                    candidates.push(RemoteCandidate {
                        format: FileFormat::Gzip,
                        path: FileFormat::Gzip.index_file_name().to_string(),
                        size_bound: info.length(),
                    });
                }
                if let Some(info) = plain {
                    candidates.push(RemoteCandidate {
                        format: FileFormat::Plain,
                        path: FileFormat::Plain.index_file_name().to_string(),
                        size_bound: info.length(),
                    });
                }
                candidates
            }
            RemoteFile::Package { path, info } => vec![RemoteCandidate {
                format: FileFormat::Plain,
                path: path.clone(),
                size_bound: info.length(),
            }],
        }
    }

    /// A human-readable name for error messages.
    pub fn description(&self) -> String {
        self.candidates()
            .first()
            .map(|c| c.path.clone())
            .unwrap_or_else(|| "<unfetchable file>".to_string())
    }
}

/// A fetched artifact: the encoding that was actually delivered, plus the
/// staged file holding its bytes.
#[derive(Debug)]
pub struct FetchedFile {
    /// The delivered encoding.
    pub format: FileFormat,
    /// The staged download.
    pub staged: StagedFile,
}

/// A downloaded artifact parked in temporary storage, pending verification
/// and promotion. Deleted on drop if never promoted.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
}

impl StagedFile {
    /// Stage the given bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut file = NamedTempFile::new()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(StagedFile { file })
    }

    /// Read the staged bytes back.
    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.file.path())?)
    }

    /// Whether the staged bytes match the given signed description.
    pub fn verify(&self, expected: &FileInfo) -> Result<bool> {
        Ok(verify::verify_file_info(expected, &self.read()?))
    }

    /// Copy the staged bytes to `dest`, atomically replacing any previous
    /// file there.
    pub fn copy_to(&self, dest: &Path) -> Result<()> {
        let dir = dest.parent().ok_or_else(|| {
            Error::IllegalArgument(format!("Destination has no parent directory: {:?}", dest))
        })?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&self.read()?)?;
        temp.flush()?;
        temp.persist(dest)?;
        Ok(())
    }

    /// The path of the staged file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// A remote repository the update driver can fetch from.
pub trait RemoteRepository {
    /// Download the described artifact to a staging location.
    ///
    /// `attempt` is the number of the current update iteration;
    /// implementations may use it to try a different origin after a
    /// failure.
    fn fetch(&mut self, attempt: u32, file: &RemoteFile) -> Result<FetchedFile>;

    /// Pin one mirror for the scope of `action`. Every fetch inside the
    /// scope hits the same origin, so different mirrors cannot lie about
    /// different roles within one update. The selection is released on all
    /// exit paths.
    ///
    /// The default implementation ignores the mirror list and fetches from
    /// the implementation's only origin.
    fn with_mirror<T>(
        &mut self,
        mirrors: Option<&MirrorsMetadata>,
        action: impl FnOnce(&mut Self) -> T,
    ) -> T
    where
        Self: Sized,
    {
        let _ = mirrors;
        action(self)
    }
}

/// An in-memory repository, mostly used for testing.
#[derive(Debug, Default)]
pub struct EphemeralRepository {
    files: std::collections::HashMap<String, Vec<u8>>,
    request_log: Vec<String>,
}

impl EphemeralRepository {
    /// Create a new repository with no files.
    pub fn new() -> Self {
        EphemeralRepository::default()
    }

    /// Serve `bytes` at the given repository-relative path.
    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(path.into(), bytes);
    }

    /// Stop serving the given path.
    pub fn remove(&mut self, path: &str) {
        self.files.remove(path);
    }

    /// The paths of all fetches issued so far, in order.
    pub fn request_log(&self) -> &[String] {
        &self.request_log
    }

    /// Forget the request log.
    pub fn clear_request_log(&mut self) {
        self.request_log.clear();
    }
}

impl RemoteRepository for EphemeralRepository {
    fn fetch(&mut self, _attempt: u32, file: &RemoteFile) -> Result<FetchedFile> {
        let candidates = file.candidates();
        for candidate in &candidates {
            if let Some(bytes) = self.files.get(&candidate.path) {
                self.request_log.push(candidate.path.clone());
                if bytes.len() as u64 > candidate.size_bound {
                    return Err(Error::Remote(format!(
                        "{} exceeds size bound of {} bytes",
                        candidate.path, candidate.size_bound
                    )));
                }
                return Ok(FetchedFile {
                    format: candidate.format,
                    staged: StagedFile::from_bytes(bytes)?,
                });
            }
        }

        if let Some(candidate) = candidates.first() {
            self.request_log.push(candidate.path.clone());
        }
        Err(Error::Remote(format!("{} not found", file.description())))
    }
}
