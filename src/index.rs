//! Side index over a zip archive.
//!
//! Reading one entry from a large archive normally means walking the central
//! directory and setting up a decompressor. The index records, for every entry,
//! where its data starts and how it is compressed, and persists that as a JSON
//! side file. Later reads slice the memory-mapped archive directly.
//!
//! The index is a cache: it is trusted only while it is strictly newer than the
//! archive and deserializes cleanly. Anything else triggers a rebuild.

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use zip::{CompressionMethod, ZipArchive};

use crate::error::{Error, Result};

const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMethod {
    Stored,
    Deflated,
    Unsupported,
}

impl From<CompressionMethod> for EntryMethod {
    fn from(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::Stored => Self::Stored,
            CompressionMethod::Deflated => Self::Deflated,
            _ => Self::Unsupported,
        }
    }
}

/// Location of one entry's data inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub offset: u64,
    pub compressed_size: u64,
    pub size: u64,
    pub method: EntryMethod,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    archive_len: u64,
    entries: BTreeMap<String, IndexedEntry>,
}

#[derive(Debug)]
pub struct ArchiveIndex {
    archive_path: PathBuf,
    index_path: PathBuf,
    entries: Option<BTreeMap<String, IndexedEntry>>,
}

impl ArchiveIndex {
    pub fn open(archive_path: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Result<Self> {
        let archive_path = archive_path.into();
        let meta = std::fs::metadata(&archive_path)
            .map_err(|e| Error::archive(&archive_path, e))?;
        if !meta.is_file() {
            return Err(Error::archive(&archive_path, "not a regular file"));
        }

        Ok(Self {
            archive_path,
            index_path: index_path.into(),
            entries: None,
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// True when the side file exists, is strictly newer than the archive and
    /// deserializes into an index built for an archive of the current size.
    pub fn is_index_fresh(&self) -> bool {
        self.read_fresh_index().is_some()
    }

    /// Scans the archive once and persists the resulting index.
    ///
    /// Returns the number of indexed entries. A side file that cannot be
    /// written only costs the next open a rescan.
    pub fn rebuild_index(&mut self) -> Result<usize> {
        let start = Instant::now();
        let file = File::open(&self.archive_path).map_err(|e| Error::archive(&self.archive_path, e))?;
        let archive_len = file
            .metadata()
            .map_err(|e| Error::archive(&self.archive_path, e))?
            .len();
        // SAFETY: The file is opened read-only and outlives the mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::archive(&self.archive_path, e))?;
        let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
            .map_err(|e| Error::archive(&self.archive_path, e))?;

        let mut entries = BTreeMap::new();
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .map_err(|e| Error::archive(&self.archive_path, e))?;
            if entry.is_dir() {
                continue;
            }
            entries.insert(
                entry.name().to_string(),
                IndexedEntry {
                    offset: entry.data_start(),
                    compressed_size: entry.compressed_size(),
                    size: entry.size(),
                    method: entry.compression().into(),
                },
            );
        }

        let index = IndexFile {
            version: INDEX_FORMAT_VERSION,
            archive_len,
            entries,
        };
        if let Err(e) = self.persist(&index) {
            tracing::warn!(
                index = %self.index_path.display(),
                error = %e,
                "failed to persist archive index, continuing with in-memory index"
            );
        }

        let count = index.entries.len();
        tracing::info!(
            archive = %self.archive_path.display(),
            entries = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "archive index rebuilt"
        );
        self.entries = Some(index.entries);
        Ok(count)
    }

    /// Reads one entry's bytes. `Ok(None)` when the archive has no such entry.
    pub fn get_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_fresh()?;
        match self.read_indexed(name) {
            Ok(found) => Ok(found),
            Err(reason) => {
                tracing::debug!(entry = name, %reason, "indexed read failed, rebuilding index");
                self.rebuild_index()?;
                self.read_indexed(name)
                    .map_err(|reason| Error::archive(&self.archive_path, format!("{name}: {reason}")))
            }
        }
    }

    pub fn entry_names(&mut self) -> Result<Vec<String>> {
        self.ensure_fresh()?;
        Ok(self
            .entries
            .as_ref()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn entry_info(&mut self, name: &str) -> Result<Option<IndexedEntry>> {
        self.ensure_fresh()?;
        Ok(self.entries.as_ref().and_then(|e| e.get(name).cloned()))
    }

    fn ensure_fresh(&mut self) -> Result<()> {
        match self.read_fresh_index() {
            Some(index) => {
                if self.entries.is_none() {
                    tracing::debug!(index = %self.index_path.display(), "using cached archive index");
                }
                self.entries = Some(index.entries);
            }
            None => {
                self.rebuild_index()?;
            }
        }
        Ok(())
    }

    fn read_fresh_index(&self) -> Option<IndexFile> {
        let archive_meta = std::fs::metadata(&self.archive_path).ok()?;
        let archive_mtime = archive_meta.modified().ok()?;
        let index_mtime = modified(&self.index_path)?;
        if index_mtime <= archive_mtime {
            return None;
        }

        let raw = std::fs::read(&self.index_path).ok()?;
        let index = match serde_json::from_slice::<IndexFile>(&raw) {
            Ok(index) => index,
            Err(e) => {
                tracing::debug!(index = %self.index_path.display(), error = %e, "discarding corrupt archive index");
                return None;
            }
        };
        if index.version != INDEX_FORMAT_VERSION || index.archive_len != archive_meta.len() {
            tracing::debug!(index = %self.index_path.display(), "discarding archive index built for another archive");
            return None;
        }
        Some(index)
    }

    fn read_indexed(&self, name: &str) -> std::result::Result<Option<Vec<u8>>, String> {
        let Some(entry) = self.entries.as_ref().and_then(|e| e.get(name)) else {
            return Ok(None);
        };

        let file = File::open(&self.archive_path).map_err(|e| e.to_string())?;
        // SAFETY: The file is opened read-only and outlives the mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| e.to_string())?;

        let start = usize::try_from(entry.offset).map_err(|e| e.to_string())?;
        let len = usize::try_from(entry.compressed_size).map_err(|e| e.to_string())?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= mmap.len())
            .ok_or_else(|| format!("entry range {start}+{len} outside archive"))?;
        let raw = &mmap[start..end];

        let data = match entry.method {
            EntryMethod::Stored => raw.to_vec(),
            EntryMethod::Deflated => miniz_oxide::inflate::decompress_to_vec(raw)
                .map_err(|e| format!("inflate failed: {e:?}"))?,
            EntryMethod::Unsupported => return Err("unsupported compression method".to_string()),
        };

        if data.len() as u64 != entry.size {
            return Err(format!(
                "size mismatch: expected {}, got {}",
                entry.size,
                data.len()
            ));
        }
        Ok(Some(data))
    }

    fn persist(&self, index: &IndexFile) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp_os = self.index_path.as_os_str().to_os_string();
        tmp_os.push(".tmp");
        let tmp = PathBuf::from(tmp_os);
        let json = serde_json::to_vec(index).map_err(std::io::Error::other)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}
