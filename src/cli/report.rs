use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    core::snapshot::CycleOutcome,
    protocol::{
        alerts::{decode_alerts, AlertMap, AlertReport},
        register::{RegisterMap, Value},
    },
};

/// One poll of one device, ready for display or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub device: String,
    pub timestamp: DateTime<Local>,
    /// The device was waiting; values are from the last good cycle.
    pub cached: bool,
    pub values: BTreeMap<String, Value>,
    /// Fields that failed to decode, with the reason.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    pub alerts: AlertReport,
}

impl PollReport {
    pub fn new(
        device: &str,
        outcome: &CycleOutcome,
        registers: &RegisterMap,
        alert_map: &AlertMap,
    ) -> Self {
        let snapshot = outcome.snapshot();
        let mut values = BTreeMap::new();
        let mut errors = BTreeMap::new();

        for (key, reading) in &snapshot.values {
            match reading {
                Ok(value) => {
                    let unit = registers.get(key).and_then(|d| d.unit.as_deref());
                    values.insert(key.clone(), render_value(value, unit));
                }
                Err(err) => {
                    errors.insert(key.clone(), err.to_string());
                }
            }
        }

        Self {
            device: device.to_string(),
            timestamp: Local::now(),
            cached: outcome.is_cached(),
            values,
            errors,
            alerts: decode_alerts(&snapshot.bitfields, alert_map),
        }
    }

    /// Human-readable multi-line rendering.
    pub fn render_text(&self, registers: &RegisterMap) -> String {
        let mut lines = vec![format!(
            "[{}] {}{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.device,
            if self.cached { " (cached)" } else { "" }
        )];

        for (key, value) in &self.values {
            match registers.get(key).and_then(|d| d.unit.as_deref()) {
                Some(unit) if unit != "Hex" && unit != "Code" && unit != "Bitfield" => {
                    lines.push(format!("  {key} = {value} {unit}"))
                }
                _ => lines.push(format!("  {key} = {value}")),
            }
        }
        for (key, error) in &self.errors {
            lines.push(format!("  {key} = <{error}>"));
        }
        for (category, alerts) in &self.alerts.categorized {
            if !alerts.is_empty() {
                lines.push(format!("  {category} alerts: {}", alerts.join("; ")));
            }
        }
        lines.join("\n")
    }
}

/// Values with a `Hex` unit are shown as `0x%04X`.
pub fn render_value(value: &Value, unit: Option<&str>) -> Value {
    match (value, unit) {
        (Value::Int(raw), Some("Hex")) => Value::Text(format!("0x{:04X}", raw)),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::snapshot::Snapshot,
        protocol::{
            alerts::AlertGroup,
            register::{DecodeError, RegisterDescriptor, RegisterType},
        },
    };

    #[test]
    fn test_render_hex_value() {
        assert_eq!(
            render_value(&Value::Int(0x1A2B), Some("Hex")),
            Value::Text("0x1A2B".to_string())
        );
        assert_eq!(render_value(&Value::Int(7), Some("Hex")), Value::Text("0x0007".to_string()));
        assert_eq!(render_value(&Value::Int(7), Some("V")), Value::Int(7));
        assert_eq!(render_value(&Value::Float(1.5), None), Value::Float(1.5));
    }

    #[test]
    fn test_report_from_outcome() {
        let registers = RegisterMap::new()
            .with(
                "firmware",
                RegisterDescriptor::new(1, RegisterType::Uint16).with_unit("Hex"),
            )
            .with(
                "fault_word",
                RegisterDescriptor::new(2, RegisterType::Uint16).with_unit("Bitfield"),
            )
            .with("serial", RegisterDescriptor::new(3, RegisterType::Ascii(4)));
        let alerts = AlertMap::from([(2, AlertGroup::new("grid").with_bit(1, "Grid Lost"))]);
        let snapshot = Snapshot {
            values: BTreeMap::from([
                ("firmware".to_string(), Ok(Value::Int(0x0203))),
                ("fault_word".to_string(), Ok(Value::Int(0b10))),
                (
                    "serial".to_string(),
                    Err(DecodeError::InsufficientWords { needed: 4, got: 1 }),
                ),
            ]),
            bitfields: BTreeMap::from([(2, 0b10)]),
        };

        let report = PollReport::new("inv", &CycleOutcome::Cached(snapshot), &registers, &alerts);
        assert!(report.cached);
        assert_eq!(report.values["firmware"], Value::Text("0x0203".to_string()));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.alerts.codes, vec![(2 << 16) | 1]);
        assert_eq!(report.alerts.categorized["grid"], vec!["Grid Lost".to_string()]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["values"]["firmware"], "0x0203");
        assert_eq!(json["values"]["fault_word"], 2);
        assert!(json["timestamp"].is_string());

        let text = report.render_text(&registers);
        assert!(text.contains("(cached)"));
        assert!(text.contains("grid alerts: Grid Lost"));
    }
}
