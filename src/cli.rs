use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "ecu-finder")]
#[command(about = "Identify ECU variants from an indexed descriptor archive")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Descriptor archive. Searched for under the roots when omitted.
    #[arg(long, value_name = "FILE")]
    pub archive: Option<PathBuf>,

    /// Side index file for the archive.
    #[arg(long, value_name = "FILE")]
    pub index: Option<PathBuf>,

    /// Directory searched for ECU.ZIP; repeatable, tried in order.
    #[arg(long, value_name = "DIR")]
    pub root: Vec<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Load the database and print a summary.
    Load,
    /// List project tags.
    Projects,
    /// List ECU function names.
    Functions {
        #[arg(short = 'p', long, value_name = "TAG")]
        project: Option<String>,
    },
    /// Resolve the request/response pair for an ECU code.
    Address {
        #[arg(value_parser = parse_code)]
        code: u8,
    },
    /// Match an identification response received from `address`.
    Identify {
        #[arg(value_parser = parse_code)]
        address: u8,

        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        response: Vec<String>,
    },
    /// Rebuild the archive index.
    Index {
        #[arg(long)]
        clear: bool,
    },
    /// List archive entry names.
    Entries,
    /// Extract one archive entry.
    Entry {
        name: String,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Accepts `26`, `0x26`, `0X26`.
pub fn parse_code(raw: &str) -> Result<u8, String> {
    let s = raw.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(s, 16).map_err(|_| format!("invalid ECU code: {raw}"))
}
