//! Static addressing tables.
//!
//! `AddressTable` maps the one-byte ECU code used by the descriptor database
//! to the request (TX) and response (RX) identifiers on the bus. Identifiers
//! are hex strings: three digits for 11-bit CAN ids, eight digits for 29-bit
//! extended ids. `FunctionTable` maps the same codes to human-readable
//! function names.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Request identifiers, `code: address`.
pub const TX_TABLE: &str = "01: 740, 04: 742, 06: 790, 07: 751, 08: 758, 09: 7E3, 0D: 755, \
    0E: 74E, 0F: 750, 11: 7C3, 13: 712, 16: 18DA71F2, 1A: 711, 1C: 74B, 1E: 748, 23: 753, \
    24: 75D, 26: 745, 27: 74D, 29: 744, 2A: 74F, 2C: 752, 32: 756, 3A: 7D6, 40: 707, \
    46: 7CD, 4D: 79D, 50: 718, 51: 743, 57: 747, 59: 714, 5D: 18DA5DF2, 60: 18DA60F1, \
    61: 79A, 62: 7DC, 66: 719, 67: 792, 6E: 7E1, 7A: 7E0, 7C: 75C, 81: 741, 93: 79B, \
    95: 7E4, 97: 7D8, A5: 705, D1: 7E6, D2: 18DAD2F1";

/// Response identifiers, `code: address`.
pub const RX_TABLE: &str = "01: 760, 04: 762, 06: 791, 07: 771, 08: 778, 09: 7EB, 0D: 775, \
    0E: 76E, 0F: 770, 11: 7C9, 13: 732, 16: 18DAF271, 1A: 731, 1C: 76B, 1E: 768, 23: 773, \
    24: 77D, 26: 765, 27: 76D, 29: 764, 2A: 76F, 2C: 772, 32: 776, 3A: 7D2, 40: 727, \
    46: 7CF, 4D: 7BD, 50: 738, 51: 763, 57: 767, 59: 734, 5D: 18DAF25D, 60: 18DAF160, \
    61: 7BA, 62: 7DD, 66: 739, 67: 793, 6E: 7E9, 7A: 7E8, 7C: 77C, 81: 761, 93: 7BB, \
    95: 7EC, 97: 7C8, A5: 725, D1: 7EE, D2: 18DAF1D2";

const BUILTIN_FUNCTIONS: &str = include_str!("addressing.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFormat {
    /// 11-bit identifier.
    Standard,
    /// 29-bit identifier (diagnostics over CAN, normal fixed addressing).
    Extended,
}

impl AddressFormat {
    fn of(address: &str) -> Option<Self> {
        match address.len() {
            1..=3 => Some(Self::Standard),
            8 => Some(Self::Extended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressEntry {
    pub code: u8,
    pub tx: String,
    pub rx: String,
}

impl AddressEntry {
    pub fn format(&self) -> AddressFormat {
        if self.tx.len() == 8 {
            AddressFormat::Extended
        } else {
            AddressFormat::Standard
        }
    }

    /// Numeric request identifier. `None` only for entries built by hand
    /// with a non-hex address.
    pub fn tx_id(&self) -> Option<u32> {
        u32::from_str_radix(&self.tx, 16).ok()
    }

    pub fn rx_id(&self) -> Option<u32> {
        u32::from_str_radix(&self.rx, 16).ok()
    }
}

/// Immutable code → (TX, RX) mapping. Built once and shared by reference.
#[derive(Debug, Clone)]
pub struct AddressTable {
    entries: BTreeMap<u8, AddressEntry>,
}

impl AddressTable {
    pub fn builtin() -> Result<Self> {
        Self::parse(TX_TABLE, RX_TABLE)
    }

    /// Builds the table from two `code: address` lists.
    ///
    /// Malformed entries are skipped. A code is kept only when both
    /// directions are known and share an addressing format.
    pub fn parse(tx_table: &str, rx_table: &str) -> Result<Self> {
        let tx = parse_direction(tx_table, "tx");
        let rx = parse_direction(rx_table, "rx");

        let mut entries = BTreeMap::new();
        for (code, tx_addr) in tx {
            let Some(rx_addr) = rx.get(&code) else {
                tracing::warn!(code, "no response address, skipping");
                continue;
            };
            if AddressFormat::of(&tx_addr) != AddressFormat::of(rx_addr) {
                tracing::warn!(code, "request and response use different formats, skipping");
                continue;
            }
            entries.insert(
                code,
                AddressEntry {
                    code,
                    tx: tx_addr,
                    rx: rx_addr.clone(),
                },
            );
        }

        if entries.is_empty() {
            return Err(Error::Configuration(
                "address table is empty after parsing".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    pub fn address_for_code(&self, code: u8) -> Option<&AddressEntry> {
        self.entries.get(&code)
    }

    /// Reverse lookup from a response identifier, e.g. `"18DAF271"`.
    pub fn code_for_rx(&self, rx: &str) -> Option<u8> {
        let wanted = rx.trim().to_ascii_uppercase();
        self.entries
            .values()
            .find(|e| e.rx == wanted)
            .map(|e| e.code)
    }

    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.keys().copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = &AddressEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_direction(table: &str, direction: &str) -> BTreeMap<u8, String> {
    let mut out = BTreeMap::new();
    for raw in table.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match parse_entry(raw) {
            Some((code, address)) => {
                out.insert(code, address);
            }
            None => tracing::warn!(direction, entry = raw, "malformed address entry, skipping"),
        }
    }
    out
}

fn parse_entry(raw: &str) -> Option<(u8, String)> {
    let (code, address) = raw.split_once(':')?;
    let code = u8::from_str_radix(code.trim(), 16).ok()?;
    let address = address.trim().to_ascii_uppercase();
    let format = AddressFormat::of(&address)?;
    let value = u32::from_str_radix(&address, 16).ok()?;
    let fits = match format {
        AddressFormat::Standard => value <= 0x7FF,
        AddressFormat::Extended => value <= 0x1FFF_FFFF,
    };
    fits.then_some((code, address))
}

/// Bus address → function name, e.g. `0x26 → "Body control"`.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    names: BTreeMap<u8, String>,
}

impl FunctionTable {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_FUNCTIONS)
    }

    /// Parses `{ "<hex address>": ["<short name>", "<function name>"] }`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("function table: {e}")))?;

        let mut names = BTreeMap::new();
        for (key, value) in raw {
            let Ok(address) = u8::from_str_radix(key.trim(), 16) else {
                tracing::warn!(key = %key, "malformed function table key, skipping");
                continue;
            };
            let Some(name) = value.get(1).or_else(|| value.first()) else {
                continue;
            };
            names.insert(address, name.clone());
        }

        if names.is_empty() {
            return Err(Error::Configuration("function table is empty".to_string()));
        }
        Ok(Self { names })
    }

    pub fn name(&self, address: u8) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.names.iter().map(|(a, n)| (*a, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_resolves_extended_pair() -> Result<()> {
        let table = AddressTable::builtin()?;
        let entry = table.address_for_code(0x16).expect("0x16 configured");
        assert_eq!(entry.tx, "18DA71F2");
        assert_eq!(entry.rx, "18DAF271");
        assert_eq!(entry.format(), AddressFormat::Extended);
        assert_eq!(entry.rx_id(), Some(0x18DA_F271));
        assert_eq!(entry.tx_id(), Some(0x18DA_71F2));
        Ok(())
    }

    #[test]
    fn builtin_resolves_standard_pair() -> Result<()> {
        let table = AddressTable::builtin()?;
        let entry = table.address_for_code(0x26).expect("0x26 configured");
        assert_eq!((entry.tx.as_str(), entry.rx.as_str()), ("745", "765"));
        assert_eq!(entry.format(), AddressFormat::Standard);
        assert_eq!(table.code_for_rx("765"), Some(0x26));
        assert_eq!(table.code_for_rx("18daf271"), Some(0x16));
        Ok(())
    }

    #[test]
    fn every_builtin_entry_round_trips_from_source_tables() -> Result<()> {
        let table = AddressTable::builtin()?;
        let tx = parse_direction(TX_TABLE, "tx");
        let rx = parse_direction(RX_TABLE, "rx");
        assert_eq!(table.len(), tx.len());
        for (code, addr) in tx {
            let entry = table.address_for_code(code).expect("configured code");
            assert_eq!(entry.tx, addr);
            assert_eq!(&entry.rx, &rx[&code]);
        }
        Ok(())
    }

    #[test]
    fn hand_built_entry_without_hex_address_has_no_id() {
        let entry = AddressEntry {
            code: 0x42,
            tx: "7E0".to_string(),
            rx: "n/a".to_string(),
        };
        assert_eq!(entry.tx_id(), Some(0x7E0));
        assert_eq!(entry.rx_id(), None);
    }

    #[test]
    fn malformed_entries_are_skipped() -> Result<()> {
        let table = AddressTable::parse(
            "01: 740, zz: 741, 02, 03: 7GG, 04: 742, 05: 12345, 06: 800",
            "01: 760, 02: 761, 03: 762, 04: 762, 05: 763, 06: 764",
        )?;
        assert_eq!(table.codes().collect::<Vec<_>>(), vec![0x01, 0x04]);
        assert_eq!(table.address_for_code(0x04).map(|e| e.rx.as_str()), Some("762"));
        assert!(table.address_for_code(0x03).is_none());
        Ok(())
    }

    #[test]
    fn mixed_formats_are_rejected() -> Result<()> {
        let table = AddressTable::parse("01: 740, 02: 18DA02F1", "01: 760, 02: 762")?;
        assert!(table.address_for_code(0x02).is_none());
        assert_eq!(table.len(), 1);
        Ok(())
    }

    #[test]
    fn empty_table_is_a_configuration_error() {
        let err = AddressTable::parse("xx, yy: 1", "").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn function_table_uses_long_name() -> Result<()> {
        let table = FunctionTable::from_json(r#"{"26": ["UCH", "Body control"], "zz": ["x"]}"#)?;
        assert_eq!(table.name(0x26), Some("Body control"));
        assert_eq!(table.len(), 1);
        assert!(FunctionTable::builtin()?.name(0x7A).is_some());
        Ok(())
    }

    #[test]
    fn function_table_rejects_garbage() {
        assert!(matches!(
            FunctionTable::from_json("[1, 2]"),
            Err(Error::Configuration(_))
        ));
    }
}
