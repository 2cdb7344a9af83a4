//! # ecu-finder
//!
//! Identifies which ECU variant answers at a diagnostic bus address and
//! resolves the request/response identifiers used to reach it.
//!
//! ## Architecture
//!
//! - **addressing**: static code → (TX, RX) identifier table and function names
//! - **index**: persisted side index over the descriptor zip archive
//! - **scan**: discovery of `ECU.ZIP` below a list of search roots
//! - **store**: in-memory variant database loaded from the archive manifest
//! - **ident**: identification response parsing and variant matching
//! - **config**: path resolution for the archive and its index
//! - **cli**: command-line definition for the `ecu-finder` binary

pub mod addressing;
pub mod cli;
pub mod config;
pub mod error;
pub mod ident;
pub mod index;
pub mod scan;
pub mod store;

pub use error::{Error, Result};
