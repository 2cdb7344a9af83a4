use anyhow::{Context, Result};
use clap::Parser;
use ecu_finder::addressing::{AddressEntry, AddressFormat, AddressTable, FunctionTable};
use ecu_finder::cli::{Cli, Commands};
use ecu_finder::config::{clear_index, resolve_archive, resolve_index_path, resolve_roots};
use ecu_finder::ident::{IdentResponse, Match, Matcher};
use ecu_finder::index::ArchiveIndex;
use ecu_finder::scan::find_archive;
use ecu_finder::store::{DescriptorStore, LoadSummary};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let addresses = AddressTable::builtin().context("Failed to build address table")?;

    match cli.command.clone() {
        Commands::Load => {
            let (_, summary) = open_store(&cli)?;
            print_json(&summary)?;
        }
        Commands::Projects => {
            let (store, _) = open_store(&cli)?;
            print_json(&store.list_projects())?;
        }
        Commands::Functions { project } => {
            let (store, _) = open_store(&cli)?;
            let names = store.function_names_for_project(project.as_deref().unwrap_or(""));
            print_json(&names)?;
        }
        Commands::Address { code } => {
            let entry = addresses
                .address_for_code(code)
                .with_context(|| format!("No address configured for ECU code {code:02X}"))?;
            print_json(&AddressOutput::from(entry))?;
        }
        Commands::Identify { address, response } => {
            let (store, _) = open_store(&cli)?;
            let raw = response.join(" ");
            let parsed = IdentResponse::parse(&raw);
            let matched = parsed
                .as_ref()
                .and_then(|r| Matcher::new(&store).identify_response(address, r));
            print_json(&IdentifyOutput {
                address: format!("{address:02X}"),
                bus: addresses.address_for_code(address).map(AddressOutput::from),
                response: parsed,
                matched: matched.is_some(),
                result: matched,
            })?;
        }
        Commands::Index { clear } => {
            let archive = resolve_archive_path(&cli)?;
            let index_path = resolve_index_path(&cli, &archive)?;
            let cleared = clear && clear_index(&index_path)?;
            let mut index = ArchiveIndex::open(&archive, &index_path)?;
            let entries = index.rebuild_index()?;
            print_json(&IndexOutput {
                archive: archive.to_string_lossy().to_string(),
                index: index_path.to_string_lossy().to_string(),
                entries,
                cleared,
            })?;
        }
        Commands::Entries => {
            let archive = resolve_archive_path(&cli)?;
            let index_path = resolve_index_path(&cli, &archive)?;
            let mut index = ArchiveIndex::open(&archive, &index_path)?;
            print_json(&index.entry_names()?)?;
        }
        Commands::Entry { name, output } => {
            let (store, _) = open_store(&cli)?;
            let bytes = store
                .read_entry(&name)?
                .with_context(|| format!("Entry not found in archive: {name}"))?;
            write_entry(&bytes, output.as_deref())?;
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_archive_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = resolve_archive(cli) {
        return Ok(p);
    }
    let roots = resolve_roots(cli);
    find_archive(&roots).with_context(|| {
        format!(
            "ECU database not found (searched: {})",
            roots
                .iter()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

fn open_store(cli: &Cli) -> Result<(DescriptorStore, LoadSummary)> {
    let archive = resolve_archive_path(cli)?;
    let index_path = resolve_index_path(cli, &archive)?;
    let store = DescriptorStore::new(FunctionTable::builtin()?);
    let summary = store
        .load_with(&archive, &index_path)
        .with_context(|| format!("Failed to load ECU database: {}", archive.display()))?;
    Ok((store, summary))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_entry(bytes: &[u8], output: Option<&Path>) -> Result<()> {
    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write entry: {}", path.display()))?;
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct AddressOutput {
    code: String,
    tx: String,
    rx: String,
    format: AddressFormat,
}

impl From<&AddressEntry> for AddressOutput {
    fn from(entry: &AddressEntry) -> Self {
        Self {
            code: format!("{:02X}", entry.code),
            tx: entry.tx.clone(),
            rx: entry.rx.clone(),
            format: entry.format(),
        }
    }
}

#[derive(Debug, Serialize)]
struct IdentifyOutput {
    address: String,
    bus: Option<AddressOutput>,
    response: Option<IdentResponse>,
    matched: bool,
    result: Option<Match>,
}

#[derive(Debug, Serialize)]
struct IndexOutput {
    archive: String,
    index: String,
    entries: usize,
    cleared: bool,
}
