//! Bitfield alert decoding
//!
//! Devices report faults and warnings as 16-bit registers where every set
//! bit is one condition. An [`AlertMap`] names the bits and sorts each
//! register into a category such as `grid` or `battery`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category and bit descriptions for one bitfield register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub category: String,
    #[serde(default)]
    pub bits: BTreeMap<u8, String>,
}

impl AlertGroup {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            bits: BTreeMap::new(),
        }
    }

    pub fn with_bit(mut self, bit: u8, description: &str) -> Self {
        self.bits.insert(bit, description.to_string());
        self
    }
}

/// Register address to alert group.
pub type AlertMap = BTreeMap<u16, AlertGroup>;

/// Decoded alerts of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertReport {
    /// `(address << 16) | bit` for every set bit of a mapped register.
    pub codes: Vec<u32>,
    /// Descriptions per category; every category of the map is present.
    pub categorized: BTreeMap<String, Vec<String>>,
}

impl AlertReport {
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Numeric code identifying `bit` of the register at `address`.
pub fn alert_code(address: u16, bit: u8) -> u32 {
    (u32::from(address) << 16) | u32::from(bit)
}

/// Decode set bits of the mapped registers into codes and categorized descriptions.
///
/// Addresses missing from either side contribute nothing. Set bits without a
/// description become `Unknown Bit N (Reg R)`.
pub fn decode_alerts(raw_bitfields: &BTreeMap<u16, u16>, alert_map: &AlertMap) -> AlertReport {
    let mut report = AlertReport {
        codes: Vec::new(),
        categorized: alert_map
            .values()
            .map(|group| (group.category.clone(), Vec::new()))
            .collect(),
    };

    for (address, group) in alert_map {
        let Some(value) = raw_bitfields.get(address) else {
            continue;
        };

        for bit in 0u8..16 {
            if value & (1 << bit) == 0 {
                continue;
            }
            report.codes.push(alert_code(*address, bit));

            let description = group
                .bits
                .get(&bit)
                .cloned()
                .unwrap_or_else(|| format!("Unknown Bit {bit} (Reg {address})"));
            report
                .categorized
                .entry(group.category.clone())
                .or_default()
                .push(description);
        }
    }

    if !report.codes.is_empty() {
        log::debug!("Decoded {} active alerts", report.codes.len());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mapped_bits() {
        let alert_map = AlertMap::from([(5, AlertGroup::new("grid").with_bit(0, "A").with_bit(2, "B"))]);
        let raw = BTreeMap::from([(5, 0b101)]);

        let report = decode_alerts(&raw, &alert_map);
        assert_eq!(report.codes, vec![5 << 16, (5 << 16) | 2]);
        assert_eq!(report.categorized["grid"], vec!["A", "B"]);
    }

    #[test]
    fn test_unknown_bits_and_unmapped_addresses() {
        let alert_map = AlertMap::from([
            (5, AlertGroup::new("grid").with_bit(0, "A")),
            (9, AlertGroup::new("battery")),
        ]);
        let raw = BTreeMap::from([(5, 0b1000_0000_0000_0010), (77, 0xFFFF)]);

        let report = decode_alerts(&raw, &alert_map);
        assert_eq!(report.codes, vec![(5 << 16) | 1, (5 << 16) | 15]);
        assert_eq!(
            report.categorized["grid"],
            vec!["Unknown Bit 1 (Reg 5)", "Unknown Bit 15 (Reg 5)"]
        );
        assert!(report.categorized["battery"].is_empty());
        assert_eq!(report.categorized.len(), 2);
    }

    #[test]
    fn test_categories_shared_between_registers() {
        let alert_map = AlertMap::from([
            (10, AlertGroup::new("inverter").with_bit(3, "Overtemp")),
            (11, AlertGroup::new("inverter").with_bit(0, "Fan fault")),
        ]);
        let raw = BTreeMap::from([(10, 0b1000), (11, 0b1)]);

        let report = decode_alerts(&raw, &alert_map);
        assert_eq!(report.categorized["inverter"], vec!["Overtemp", "Fan fault"]);
        assert_eq!(report.codes, vec![alert_code(10, 3), alert_code(11, 0)]);
    }

    #[test]
    fn test_no_bits_set() {
        let alert_map = AlertMap::from([(1, AlertGroup::new("grid").with_bit(0, "A"))]);
        let report = decode_alerts(&BTreeMap::from([(1, 0)]), &alert_map);
        assert!(report.is_empty());
        assert_eq!(report.categorized["grid"], Vec::<String>::new());
    }
}
