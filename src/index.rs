//! Random-access reads from the package index archive.
//!
//! The package index is a tar archive (optionally delivered gzipped)
//! containing one targets document per package version. The archive is
//! scanned once to build a path-to-offset map; individual entries are then
//! read back by seeking to their header block, so looking up one package
//! never touches the rest of the index.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Archive;

use crate::error::Error;
use crate::Result;

/// Decode a gzip stream into plain bytes.
pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| Error::Encoding(format!("gzip: {}", e)))?;
    Ok(out)
}

/// Encode plain bytes as a gzip stream.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| Error::Encoding(format!("gzip: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Encoding(format!("gzip: {}", e)))
}

/// The header of one index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The archive-relative path of the entry.
    pub path: String,
    /// The size of the entry's content in bytes.
    pub size: u64,
}

/// Random access to entries of the package index.
pub trait IndexReader {
    /// The offset of the named entry's header block, if the entry exists.
    fn lookup(&self, path: &str) -> Option<u64>;

    /// Read the entry whose header block starts at `offset`.
    fn read_at(&mut self, offset: u64) -> Result<(IndexEntry, Vec<u8>)>;
}

/// An [`IndexReader`] over an uncompressed tar archive on disk.
#[derive(Debug)]
pub struct TarIndex {
    file: File,
    offsets: HashMap<String, u64>,
}

impl TarIndex {
    /// Open the archive at `path` and scan it into an offset index.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| Error::from_io(&e, path))?;

        let mut offsets = HashMap::new();
        {
            let mut archive = Archive::new(&mut file);
            for entry in archive
                .entries()
                .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?
            {
                let entry = entry
                    .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let entry_path = entry
                    .path()
                    .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?
                    .to_string_lossy()
                    .into_owned();
                offsets.insert(entry_path, entry.raw_header_position());
            }
        }

        Ok(TarIndex { file, offsets })
    }

    /// The number of file entries in the index.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the index has no file entries.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl IndexReader for TarIndex {
    fn lookup(&self, path: &str) -> Option<u64> {
        self.offsets.get(path).copied()
    }

    fn read_at(&mut self, offset: u64) -> Result<(IndexEntry, Vec<u8>)> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?;

        // A tar entry is a well-formed archive prefix, so a fresh reader
        // positioned at the header block yields exactly that entry.
        let mut archive = Archive::new(&mut self.file);
        let mut entries = archive
            .entries()
            .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?;
        let mut entry = entries
            .next()
            .ok_or_else(|| {
                Error::LocalFileCorrupted(format!("package index: no entry at offset {}", offset))
            })?
            .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?;

        let path = entry
            .path()
            .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let size = entry
            .header()
            .size()
            .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?;

        let mut bytes = Vec::with_capacity(size as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| Error::LocalFileCorrupted(format!("package index: {}", e)))?;

        Ok((IndexEntry { path, size }, bytes))
    }
}
