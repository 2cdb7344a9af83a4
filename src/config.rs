use sha2::{Digest, Sha256};
use std::env;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::scan::default_search_roots;

pub const ARCHIVE_ENV: &str = "ECU_FINDER_ARCHIVE";
pub const INDEX_ENV: &str = "ECU_FINDER_INDEX";

pub fn resolve_archive(cli: &Cli) -> Option<PathBuf> {
    if let Some(p) = cli.archive.clone() {
        return Some(p);
    }
    env::var_os(ARCHIVE_ENV).map(PathBuf::from)
}

pub fn resolve_roots(cli: &Cli) -> Vec<PathBuf> {
    if !cli.root.is_empty() {
        return cli.root.clone();
    }
    default_search_roots()
}

pub fn resolve_index_path(cli: &Cli, archive: &Path) -> Result<PathBuf> {
    if let Some(p) = cli.index.clone() {
        return Ok(p);
    }
    if let Some(p) = env::var_os(INDEX_ENV) {
        return Ok(PathBuf::from(p));
    }
    default_index_path(archive)
}

/// Side index location for `archive` inside the data directory. The name is
/// derived from the archive's canonical path so several archives can coexist.
pub fn default_index_path(archive: &Path) -> Result<PathBuf> {
    let canonical = archive
        .canonicalize()
        .unwrap_or_else(|_| archive.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());

    let stem = archive
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("archive")
        .to_ascii_lowercase();
    let file_name = format!("{stem}-{}.idx.json", &digest[..16]);

    Ok(ecu_finder_home()?.join("index").join(file_name))
}

pub fn clear_index(index_path: &Path) -> Result<bool> {
    if !index_path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(index_path)?;
    Ok(true)
}

fn ecu_finder_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| Error::Configuration("failed to resolve data directory".to_string()))?;
    Ok(base.join("ecu-finder"))
}
