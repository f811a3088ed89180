//! The locally trusted metadata cache.
//!
//! One directory holds the four role documents plus the uncompressed
//! package index. Documents are re-admitted as trusted on read (they were
//! verified before they were committed), and every commit goes through a
//! staged temporary file so a crash mid-write leaves the previous file
//! intact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::debug;
use tempfile::NamedTempFile;

use crate::crypto::{self, HashValue};
use crate::error::Error;
use crate::index::TarIndex;
use crate::metadata::{FileFormat, Metadata, RawSignedMetadata, Role, RootMetadata, INDEX_TAR};
use crate::repository::StagedFile;
use crate::verify::{self, Trusted};
use crate::Result;

/// The locally trusted copies of the metadata roles and the package index.
#[derive(Debug)]
pub struct MetadataCache {
    path: PathBuf,
    lock: Mutex<()>,
}

/// A scoped guard serializing verification-then-commit windows against the
/// same cache. Dropped on all exit paths.
#[derive(Debug)]
pub struct CacheLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MetadataCache {
    /// Open (and create if necessary) a cache at the given directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path).map_err(|e| Error::from_io(&e, &path))?;
        Ok(MetadataCache {
            path,
            lock: Mutex::new(()),
        })
    }

    /// The cache directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the cache for one verification-then-commit window.
    pub fn acquire(&self) -> CacheLock<'_> {
        CacheLock {
            _guard: self.lock.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.file_path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from_io(&e, &self.file_path(name))),
        }
    }

    /// Whether a root document has been committed.
    pub fn has_root(&self) -> bool {
        self.file_path(Role::Root.file_name()).is_file()
    }

    /// Load the cached document for the given role, if present.
    pub fn cached<M: Metadata>(&self) -> Result<Option<Trusted<M>>> {
        let name = M::ROLE.file_name();
        let bytes = match self.read_bytes(name)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let raw = RawSignedMetadata::<M>::new(bytes);
        let parsed = raw
            .parse()
            .map_err(|e| Error::LocalFileCorrupted(format!("{}: {}", name, e)))?;
        Ok(Some(verify::admit_cached(parsed.metadata)))
    }

    /// Load the cached root document. The root is always present after
    /// bootstrap; a missing or unreadable root is broken local state.
    pub fn trusted_root(&self) -> Result<Trusted<RootMetadata>> {
        self.cached::<RootMetadata>()?.ok_or_else(|| {
            Error::LocalFileCorrupted(
                "trusted root metadata is missing (has the client been bootstrapped?)".into(),
            )
        })
    }

    /// The SHA-256 digest of the cached file with the given name, used to
    /// detect whether a refreshed document actually changed.
    pub fn file_sha256(&self, name: &str) -> Result<Option<HashValue>> {
        Ok(self.read_bytes(name)?.map(|bytes| crypto::sha256(&bytes)))
    }

    /// Promote a staged download to the cache under the given role.
    pub fn commit(&self, role: Role, staged: &StagedFile) -> Result<()> {
        debug!("committing {} metadata to cache", role);
        staged.copy_to(&self.file_path(role.file_name()))
    }

    /// Promote a staged index download to the cache. The index is always
    /// stored uncompressed; a gzipped delivery is decoded after it has been
    /// verified in its delivered form.
    pub fn commit_index(&self, staged: &StagedFile, format: FileFormat) -> Result<()> {
        debug!("committing package index ({:?}) to cache", format);
        match format {
            FileFormat::Plain => staged.copy_to(&self.file_path(INDEX_TAR)),
            FileFormat::Gzip => {
                let bytes = crate::index::gunzip(&staged.read()?)?;
                self.write_atomic(INDEX_TAR, &bytes)
            }
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut temp = NamedTempFile::new_in(&self.path)?;
        temp.write_all(bytes)?;
        temp.flush()?;
        temp.persist(self.file_path(name))?;
        Ok(())
    }

    /// Drop the cached timestamp, snapshot, and mirrors documents. The root
    /// and the index are retained.
    pub fn clear(&self) -> Result<()> {
        debug!("clearing cached timestamp, snapshot, and mirrors metadata");
        for role in &[Role::Timestamp, Role::Snapshot, Role::Mirrors] {
            match fs::remove_file(self.file_path(role.file_name())) {
                Ok(()) => (),
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => return Err(Error::from_io(&e, &self.file_path(role.file_name()))),
            }
        }
        Ok(())
    }

    /// Whether a package index has been committed.
    pub fn has_index(&self) -> bool {
        self.file_path(INDEX_TAR).is_file()
    }

    /// Open a random-access reader over the cached package index.
    pub fn index_reader(&self) -> Result<TarIndex> {
        if !self.has_index() {
            return Err(Error::LocalFileCorrupted(
                "package index has not been fetched".into(),
            ));
        }
        TarIndex::open(&self.file_path(INDEX_TAR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{HashAlgorithm, PrivateKey};
    use crate::metadata::{FileInfo, TimestampMetadata, TimestampMetadataBuilder};
    use tempfile::tempdir;

    fn staged_timestamp(key: &PrivateKey, version: u64) -> StagedFile {
        let info = FileInfo::from_reader(&b"snapshot"[..], &[HashAlgorithm::Sha256]).unwrap();
        let signed = TimestampMetadataBuilder::from_file_info(info)
            .version(version)
            .signed(key)
            .unwrap();
        StagedFile::from_bytes(signed.to_raw().unwrap().as_bytes()).unwrap()
    }

    #[test]
    fn commit_read_and_clear() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
        let key = PrivateKey::generate().unwrap();

        assert!(!cache.has_root());
        assert!(cache.cached::<TimestampMetadata>().unwrap().is_none());

        cache
            .commit(Role::Timestamp, &staged_timestamp(&key, 7))
            .unwrap();
        let cached = cache.cached::<TimestampMetadata>().unwrap().unwrap();
        assert_eq!(cached.version(), 7);

        cache.clear().unwrap();
        assert!(cache.cached::<TimestampMetadata>().unwrap().is_none());
        // clearing twice is fine
        cache.clear().unwrap();
    }

    #[test]
    fn commit_replaces_previous_document() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
        let key = PrivateKey::generate().unwrap();

        cache
            .commit(Role::Timestamp, &staged_timestamp(&key, 1))
            .unwrap();
        let before = cache.file_sha256(Role::Timestamp.file_name()).unwrap();

        cache
            .commit(Role::Timestamp, &staged_timestamp(&key, 2))
            .unwrap();
        let after = cache.file_sha256(Role::Timestamp.file_name()).unwrap();

        assert!(before.is_some());
        assert_ne!(before, after);
        let cached = cache.cached::<TimestampMetadata>().unwrap().unwrap();
        assert_eq!(cached.version(), 2);
    }

    #[test]
    fn corrupted_cache_file_is_an_error() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
        std::fs::write(cache.path().join(Role::Timestamp.file_name()), b"junk").unwrap();

        match cache.cached::<TimestampMetadata>() {
            Err(Error::LocalFileCorrupted(_)) => (),
            other => panic!("expected LocalFileCorrupted, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempdir().unwrap();
        let cache = MetadataCache::open(dir.path().join("cache")).unwrap();
        match cache.trusted_root() {
            Err(Error::LocalFileCorrupted(_)) => (),
            other => panic!("expected LocalFileCorrupted, got {:?}", other.map(|_| ())),
        }
    }
}
