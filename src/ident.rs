//! ECU identification.
//!
//! Matches the response to an identification request (`21 80`, answered with
//! `61 80 ...`) against the variants known at the responding address.
//!
//! Response layout, in bytes after whitespace removal:
//!
//! ```text
//!  0..2   service echo (61 80)
//!  2..7   part number
//!  7      diagnostic version
//!  8..11  supplier code (ASCII)
//! 11..16  hardware number
//! 16..18  software version
//! 18..20  version
//! ```

use serde::Serialize;

use crate::store::{DescriptorStore, EcuVariant, VariantIdent};

/// Shortest response that carries every compared field.
pub const MIN_RESPONSE_BYTES: usize = 20;

const DIAG_VERSION_AT: usize = 7;
const SUPPLIER_AT: std::ops::Range<usize> = 8..11;
const SOFT_VERSION_AT: std::ops::Range<usize> = 16..18;
const VERSION_AT: std::ops::Range<usize> = 18..20;

/// Fields extracted from a raw identification response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentResponse {
    pub supplier_code: String,
    pub soft_version: String,
    pub version: String,
    pub diagnostic_version: u8,
}

impl IdentResponse {
    /// Parses a hex string such as `"61 80 82 00 ..."`. Returns `None` when it
    /// is too short, not hex or leaves half a byte.
    pub fn parse(raw: &str) -> Option<Self> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() % 2 != 0 || compact.len() / 2 < MIN_RESPONSE_BYTES {
            return None;
        }
        let bytes = hex::decode(&compact).ok()?;

        Some(Self {
            supplier_code: String::from_utf8_lossy(&bytes[SUPPLIER_AT])
                .trim()
                .to_string(),
            soft_version: hex::encode_upper(&bytes[SOFT_VERSION_AT]),
            version: hex::encode_upper(&bytes[VERSION_AT]),
            diagnostic_version: bytes[DIAG_VERSION_AT],
        })
    }

    fn version_value(&self) -> Option<u16> {
        u16::from_str_radix(&self.version, 16).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Supplier, software, version and diagnostic version all equal.
    Exact,
    /// Supplier and software equal; nearest version.
    Closest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub variant: EcuVariant,
    pub ident: VariantIdent,
    pub kind: MatchKind,
}

impl Match {
    pub fn is_exact(&self) -> bool {
        self.kind == MatchKind::Exact
    }
}

pub struct Matcher<'a> {
    store: &'a DescriptorStore,
}

impl<'a> Matcher<'a> {
    pub fn new(store: &'a DescriptorStore) -> Self {
        Self { store }
    }

    /// Identifies the ECU at `address` from its raw identification response.
    pub fn identify(&self, address: u8, raw: &str) -> Option<Match> {
        let response = IdentResponse::parse(raw)?;
        self.identify_response(address, &response)
    }

    pub fn identify_response(&self, address: u8, response: &IdentResponse) -> Option<Match> {
        let state = self.store.snapshot();
        let found = select(state.variants_at(address), response);
        match &found {
            Some(m) => tracing::debug!(
                address,
                variant = %m.variant.name,
                kind = ?m.kind,
                "ECU identified"
            ),
            None => tracing::debug!(address, supplier = %response.supplier_code, "no matching ECU variant"),
        }
        found
    }
}

/// First exact ident wins, in candidate then ident order. Otherwise the ident
/// with the smallest version distance among those sharing supplier and
/// software; ties keep the earlier one.
fn select(candidates: &[EcuVariant], response: &IdentResponse) -> Option<Match> {
    let observed = response.version_value()?;
    let mut closest: Option<(&EcuVariant, &VariantIdent, u32)> = None;

    for variant in candidates {
        for ident in &variant.idents {
            if !ident.supplier_code.eq_ignore_ascii_case(&response.supplier_code)
                || !ident.soft_version.eq_ignore_ascii_case(&response.soft_version)
            {
                continue;
            }

            let Some(version) = ident.version_value() else {
                continue;
            };
            if version == observed && ident.diagnostic_version == response.diagnostic_version {
                return Some(Match {
                    variant: variant.clone(),
                    ident: ident.clone(),
                    kind: MatchKind::Exact,
                });
            }

            let distance = (i32::from(version) - i32::from(observed)).unsigned_abs();
            if closest.is_none_or(|(_, _, best)| distance < best) {
                closest = Some((variant, ident, distance));
            }
        }
    }

    closest.map(|(variant, ident, _)| Match {
        variant: variant.clone(),
        ident: ident.clone(),
        kind: MatchKind::Closest,
    })
}
