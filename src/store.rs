//! In-memory descriptor database.
//!
//! Variant records come from the `db.json` manifest inside the descriptor
//! archive. The store keeps them grouped by bus address together with the
//! function names of the addresses the archive actually covers.
//!
//! A load builds the complete new state first and swaps it in under the write
//! lock, so readers see either the previous database or the new one, never a
//! mix. A failed load leaves the previous database in place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::addressing::FunctionTable;
use crate::config::default_index_path;
use crate::error::{Error, Result};
use crate::index::ArchiveIndex;
use crate::scan::find_archive;

/// Manifest entry name inside the archive.
pub const MANIFEST_ENTRY: &str = "db.json";

/// One known firmware/hardware build of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantIdent {
    pub supplier_code: String,
    /// Two bytes, upper-case hex.
    pub soft_version: String,
    /// Two bytes, upper-case hex.
    pub version: String,
    pub diagnostic_version: u8,
}

impl VariantIdent {
    pub fn version_value(&self) -> Option<u16> {
        u16::from_str_radix(&self.version, 16).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EcuVariant {
    pub href: String,
    pub name: String,
    pub protocol: String,
    /// Upper-cased project tags.
    pub projects: BTreeSet<String>,
    pub address: u8,
    pub idents: Vec<VariantIdent>,
}

#[derive(Debug, Deserialize)]
struct ManifestRecord {
    ecuname: String,
    #[serde(default)]
    protocol: String,
    address: String,
    projects: Vec<String>,
    #[serde(default)]
    autoidents: Vec<ManifestIdent>,
}

#[derive(Debug, Deserialize)]
struct ManifestIdent {
    supplier_code: String,
    soft_version: String,
    version: String,
    diagnostic_version: DiagnosticVersion,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiagnosticVersion {
    Number(u64),
    Text(String),
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    variants: HashMap<u8, Vec<EcuVariant>>,
    functions: BTreeMap<u8, String>,
    projects: BTreeSet<String>,
    archive: Option<PathBuf>,
    index: Option<PathBuf>,
}

impl StoreState {
    pub(crate) fn variants_at(&self, address: u8) -> &[EcuVariant] {
        self.variants.get(&address).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub archive: PathBuf,
    pub variants: usize,
    pub addresses: usize,
    pub projects: usize,
    pub functions: usize,
    pub duration_ms: u64,
}

/// Thread-safe store of ECU variant records keyed by bus address.
#[derive(Debug)]
pub struct DescriptorStore {
    function_table: FunctionTable,
    state: RwLock<Arc<StoreState>>,
}

impl DescriptorStore {
    /// Creates an empty store. Until the first load, every function name of
    /// `function_table` is listed.
    pub fn new(function_table: FunctionTable) -> Self {
        let state = StoreState {
            functions: function_table
                .iter()
                .map(|(a, n)| (a, n.to_string()))
                .collect(),
            ..StoreState::default()
        };
        Self {
            function_table,
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// Loads the database from `archive`, or from the first `ECU.ZIP` found
    /// under `roots` when no archive is given. Returns the resolved path.
    pub fn load(&self, archive: Option<&Path>, roots: &[PathBuf]) -> Result<PathBuf> {
        let archive = match archive {
            Some(p) => p.to_path_buf(),
            None => find_archive(roots)
                .ok_or_else(|| Error::NotFound("ECU database archive".to_string()))?,
        };
        let index_path = default_index_path(&archive)?;
        self.load_with(&archive, &index_path).map(|summary| summary.archive)
    }

    /// Loads the database from `archive` using `index_path` as side index.
    pub fn load_with(&self, archive: &Path, index_path: &Path) -> Result<LoadSummary> {
        let start = Instant::now();
        let mut index = ArchiveIndex::open(archive, index_path)?;
        let manifest = index.get_entry(MANIFEST_ENTRY)?.ok_or_else(|| {
            Error::Parse(format!("{MANIFEST_ENTRY} missing from {}", archive.display()))
        })?;

        let mut state = self.build_state(&manifest)?;
        state.archive = Some(archive.to_path_buf());
        state.index = Some(index_path.to_path_buf());

        let summary = LoadSummary {
            archive: archive.to_path_buf(),
            variants: state.variants.values().map(Vec::len).sum(),
            addresses: state.variants.len(),
            projects: state.projects.len(),
            functions: state.functions.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        self.swap(state);

        tracing::info!(
            archive = %archive.display(),
            variants = summary.variants,
            addresses = summary.addresses,
            projects = summary.projects,
            elapsed_ms = summary.duration_ms,
            "ECU database loaded"
        );
        Ok(summary)
    }

    /// Replaces the database with the records of an in-memory manifest.
    pub fn load_manifest(&self, manifest: &[u8]) -> Result<()> {
        let state = self.build_state(manifest)?;
        self.swap(state);
        Ok(())
    }

    fn build_state(&self, manifest: &[u8]) -> Result<StoreState> {
        let records: BTreeMap<String, ManifestRecord> = serde_json::from_slice(manifest)
            .map_err(|e| Error::Parse(format!("{MANIFEST_ENTRY}: {e}")))?;

        let mut state = StoreState::default();
        for (href, record) in records {
            let variant = parse_record(href, record)?;
            state.projects.extend(variant.projects.iter().cloned());
            state
                .variants
                .entry(variant.address)
                .or_default()
                .push(variant);
        }

        for (address, name) in self.function_table.iter() {
            if state.variants.contains_key(&address) {
                state.functions.insert(address, name.to_string());
            }
        }
        Ok(state)
    }

    fn swap(&self, state: StoreState) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(state);
    }

    pub(crate) fn snapshot(&self) -> Arc<StoreState> {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().archive.is_some()
    }

    pub fn archive_path(&self) -> Option<PathBuf> {
        self.snapshot().archive.clone()
    }

    pub fn variants_at(&self, address: u8) -> Vec<EcuVariant> {
        self.snapshot().variants_at(address).to_vec()
    }

    pub fn variant_count(&self) -> usize {
        self.snapshot().variants.values().map(Vec::len).sum()
    }

    pub fn addresses(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self.snapshot().variants.keys().copied().collect();
        out.sort_unstable();
        out
    }

    pub fn list_projects(&self) -> Vec<String> {
        self.snapshot().projects.iter().cloned().collect()
    }

    pub fn function_names(&self) -> Vec<String> {
        let state = self.snapshot();
        let names: BTreeSet<&String> = state.functions.values().collect();
        names.into_iter().cloned().collect()
    }

    /// Function names of the ECUs tagged with `project`. An empty tag lists
    /// every function.
    pub fn function_names_for_project(&self, project: &str) -> Vec<String> {
        let project = project.trim().to_uppercase();
        if project.is_empty() {
            return self.function_names();
        }

        let state = self.snapshot();
        let mut names = BTreeSet::new();
        for variant in state.variants.values().flatten() {
            if !variant.projects.contains(&project) {
                continue;
            }
            if let Some(name) = state.functions.get(&variant.address) {
                names.insert(name.clone());
            }
        }
        names.into_iter().collect()
    }

    pub fn address_for_function_name(&self, name: &str) -> Option<u8> {
        self.snapshot()
            .functions
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(a, _)| *a)
    }

    /// Reads an arbitrary entry, e.g. a variant's `href` document, from the
    /// loaded archive.
    pub fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let state = self.snapshot();
        let (Some(archive), Some(index)) = (state.archive.as_ref(), state.index.as_ref()) else {
            return Err(Error::NotFound("no ECU database loaded".to_string()));
        };
        ArchiveIndex::open(archive, index)?.get_entry(name)
    }
}

fn parse_record(href: String, record: ManifestRecord) -> Result<EcuVariant> {
    let address = u8::from_str_radix(record.address.trim(), 16)
        .map_err(|_| Error::Parse(format!("{href}: invalid address {:?}", record.address)))?;

    let idents = record
        .autoidents
        .into_iter()
        .map(|ident| parse_ident(&href, ident))
        .collect::<Result<Vec<_>>>()?;

    Ok(EcuVariant {
        projects: record
            .projects
            .iter()
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect(),
        name: record.ecuname,
        protocol: record.protocol,
        address,
        idents,
        href,
    })
}

fn parse_ident(href: &str, ident: ManifestIdent) -> Result<VariantIdent> {
    let diagnostic_version = match ident.diagnostic_version {
        DiagnosticVersion::Number(n) => u8::try_from(n).ok(),
        DiagnosticVersion::Text(s) => u8::from_str_radix(s.trim(), 16).ok(),
    }
    .ok_or_else(|| Error::Parse(format!("{href}: invalid diagnostic_version")))?;

    Ok(VariantIdent {
        supplier_code: ident.supplier_code.trim().to_string(),
        soft_version: ident.soft_version.trim().to_ascii_uppercase(),
        version: ident.version.trim().to_ascii_uppercase(),
        diagnostic_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "ecus/uch_x10.json": {
            "ecuname": "UCH X10", "protocol": "KWP2000", "address": "26",
            "projects": ["x10", "X87"],
            "autoidents": [
                {"supplier_code": "SIE", "soft_version": "0a12", "version": "0010", "diagnostic_version": "0C"}
            ]
        },
        "ecus/uch_x87.json": {
            "ecuname": "UCH X87", "protocol": "KWP2000", "address": "26",
            "projects": ["X87"], "autoidents": []
        },
        "ecus/inj.json": {
            "ecuname": "Injection", "protocol": "CAN", "address": "7A",
            "projects": ["X10"],
            "autoidents": [
                {"supplier_code": "BOS", "soft_version": "0001", "version": "0002", "diagnostic_version": 4}
            ]
        },
        "ecus/unknown.json": {
            "ecuname": "Prototype", "address": "F0", "projects": ["lab"]
        }
    }"#;

    fn store() -> Result<DescriptorStore> {
        let store = DescriptorStore::new(FunctionTable::builtin()?);
        store.load_manifest(MANIFEST.as_bytes())?;
        Ok(store)
    }

    #[test]
    fn records_are_grouped_by_address() -> Result<()> {
        let store = store()?;
        let uch = store.variants_at(0x26);
        assert_eq!(uch.len(), 2);
        assert!(uch.iter().all(|v| v.address == 0x26));
        assert!(store.variants_at(0x01).is_empty());
        assert_eq!(store.addresses(), vec![0x26, 0x7A, 0xF0]);
        assert_eq!(store.variant_count(), 4);
        Ok(())
    }

    #[test]
    fn project_tags_are_upper_cased_and_collected() -> Result<()> {
        let store = store()?;
        assert_eq!(store.list_projects(), vec!["LAB", "X10", "X87"]);
        let inj = &store.variants_at(0x7A)[0];
        assert!(inj.projects.contains("X10"));
        assert_eq!(inj.idents[0].diagnostic_version, 4);
        let uch = &store.variants_at(0x26)[0];
        assert_eq!(uch.idents[0].diagnostic_version, 0x0C);
        assert_eq!(uch.idents[0].soft_version, "0A12");
        Ok(())
    }

    #[test]
    fn function_names_follow_loaded_addresses() -> Result<()> {
        let store = store()?;
        assert_eq!(store.function_names(), vec!["Body control", "Engine management"]);
        assert_eq!(store.function_names_for_project("x87"), vec!["Body control"]);
        assert_eq!(
            store.function_names_for_project("X10"),
            vec!["Body control", "Engine management"]
        );
        assert_eq!(store.function_names_for_project(""), store.function_names());
        assert!(store.function_names_for_project("LAB").is_empty());
        assert_eq!(store.address_for_function_name("Engine management"), Some(0x7A));
        assert_eq!(store.address_for_function_name("Airbag"), None);
        Ok(())
    }

    #[test]
    fn unloaded_store_lists_every_function() -> Result<()> {
        let table = FunctionTable::builtin()?;
        let store = DescriptorStore::new(table.clone());
        assert!(!store.is_loaded());
        assert_eq!(store.address_for_function_name("Airbag"), Some(0x2C));
        assert_eq!(store.function_names().len(), table.len());
        assert!(matches!(store.read_entry("db.json"), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn bad_manifest_leaves_store_untouched() -> Result<()> {
        let store = store()?;
        let before = store.variants_at(0x26);

        for bad in [
            &b"not json"[..],
            br#"{"x": {"ecuname": "A", "address": "ZZ", "projects": []}}"#,
            br#"{"x": {"ecuname": "A", "address": "01"}}"#,
            br#"{"x": {"ecuname": "A", "address": "01", "projects": [],
                "autoidents": [{"supplier_code": "A", "soft_version": "0", "version": "0", "diagnostic_version": 300}]}}"#,
        ] {
            assert!(matches!(store.load_manifest(bad), Err(Error::Parse(_))));
            assert_eq!(store.variants_at(0x26), before);
        }
        Ok(())
    }
}
