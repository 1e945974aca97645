use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc};

use crate::{
    api::{
        Endpoint, EndpointLink, ParamOverrides, Protocol, Session, SessionConfig, WaitingStatus,
    },
    core::error::{EngineError, EngineResult},
    protocol::{alerts::AlertMap, modbus::MAX_READ_REGISTERS, register::RegisterMap},
};

/// Root configuration of one polled device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name used in logs and reports
    pub name: String,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub protocol: Protocol,
    /// Read tuning
    #[serde(default)]
    pub session: SessionConfig,
    /// Parameters excluded from latency-based tuning
    #[serde(default)]
    pub overrides: ParamOverrides,
    pub registers: RegisterMap,
    /// Bitfield register address to alert category and bit names
    #[serde(default)]
    pub alerts: AlertMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_status: Option<WaitingStatus>,
}

impl DeviceConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Read configuration from a `.json` or `.toml` file
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read config file {}", file_path.display()))?;

        let extension = file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let config = match extension.as_deref() {
            Some("toml") => Self::from_toml(&content)
                .with_context(|| format!("Invalid TOML in {}", file_path.display()))?,
            Some("json") | None => Self::from_json(&content)
                .with_context(|| format!("Invalid JSON in {}", file_path.display()))?,
            Some(other) => return Err(anyhow!("Unsupported config format '.{other}'")),
        };
        Ok(config)
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject tables the engine could only fail on at runtime.
    pub fn validate(&self) -> EngineResult<()> {
        self.overrides.apply(&self.session).validate()?;

        let version = self.protocol.version();
        for (key, descriptor) in self.registers.iter() {
            if !descriptor.register_type.is_known() {
                return Err(EngineError::config(format!(
                    "register '{key}' has unknown type '{}'",
                    descriptor.register_type
                )));
            }

            match (descriptor.function_kind.request_kind(), &self.protocol) {
                (Some(_), Protocol::Modbus { .. }) => {
                    return Err(EngineError::config(format!(
                        "register '{key}' is in the {} block but the device speaks Modbus",
                        descriptor.function_kind
                    )));
                }
                (None, Protocol::Framed { .. }) => {
                    return Err(EngineError::config(format!(
                        "register '{key}' is in the {} bank but the device speaks the framed protocol",
                        descriptor.function_kind
                    )));
                }
                (None, Protocol::Modbus { .. }) if descriptor.word_count() > MAX_READ_REGISTERS => {
                    return Err(EngineError::config(format!(
                        "register '{key}' spans {} words, a Modbus read carries at most {}",
                        descriptor.word_count(),
                        MAX_READ_REGISTERS
                    )));
                }
                (Some(kind), Protocol::Framed { .. }) if descriptor.available_in(version) => {
                    let payload_words = u32::from(kind.payload_words(version));
                    if descriptor.end_address() > payload_words {
                        return Err(EngineError::config(format!(
                            "register '{key}' ends at word {} past the {} words of the {version} {kind} block",
                            descriptor.end_address(),
                            payload_words
                        )));
                    }
                }
                _ => {}
            }
        }

        for (address, group) in &self.alerts {
            if let Some(bit) = group.bits.keys().find(|bit| **bit > 15) {
                return Err(EngineError::config(format!(
                    "alert register {address} names bit {bit}, bitfields have 16 bits"
                )));
            }
        }

        if let Some(waiting) = &self.waiting_status {
            if self.registers.get(&waiting.key).is_none() {
                return Err(EngineError::config(format!(
                    "waiting status register '{}' is not defined",
                    waiting.key
                )));
            }
        }

        Ok(())
    }

    /// Validate and open a disconnected session for this device.
    pub fn build_session(&self) -> EngineResult<Session> {
        self.validate()?;
        let session = Session::new(
            Box::new(EndpointLink::new(self.endpoint.clone())),
            self.protocol,
            Arc::new(self.registers.clone()),
            self.session.clone(),
            self.overrides.clone(),
        )?;
        Ok(match &self.waiting_status {
            Some(waiting) => session.with_waiting_status(waiting.clone()),
            None => session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        alerts::AlertGroup,
        framed::ProtocolVersion,
        register::{FunctionKind, RegisterDescriptor, RegisterType},
    };

    fn framed_config() -> DeviceConfig {
        DeviceConfig {
            name: "hybrid-inverter".to_string(),
            endpoint: Endpoint::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 19200,
            },
            protocol: Protocol::Framed {
                version: ProtocolVersion::V1,
                target_address: 0,
            },
            session: SessionConfig::default(),
            overrides: ParamOverrides::default(),
            registers: RegisterMap::new()
                .with(
                    "battery_voltage",
                    RegisterDescriptor::new(10, RegisterType::Uint16)
                        .with_scale(0.1)
                        .with_unit("V")
                        .with_function_kind(FunctionKind::State),
                )
                .with(
                    "fault_word",
                    RegisterDescriptor::new(40, RegisterType::Uint16)
                        .with_unit("Bitfield")
                        .with_function_kind(FunctionKind::State),
                ),
            alerts: AlertMap::from([(40, AlertGroup::new("grid").with_bit(0, "Grid Overvoltage"))]),
            waiting_status: None,
        }
    }

    #[test]
    fn test_config_serialization() {
        let config = framed_config();
        let json = config.to_json().unwrap();
        println!("{json}");

        let parsed = DeviceConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            name = "garage-battery"

            [endpoint]
            type = "tcp"
            host = "192.168.1.50"
            port = 502

            [protocol]
            kind = "modbus"
            unit_id = 3

            [overrides]
            timeout_ms = 8000

            [registers.soc]
            address = 256
            type = "uint16"
            unit = "%"

            [registers.power]
            address = 258
            type = "int32"
            scale = 0.1
            function_kind = "input"
        "#;

        let config = DeviceConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.registers.len(), 2);
        assert_eq!(config.overrides.timeout_ms, Some(8000));
        assert_eq!(config.session, SessionConfig::default());
        assert!(matches!(config.protocol, Protocol::Modbus { unit_id: 3, .. }));
        assert_eq!(
            config.registers.get("power").unwrap().function_kind,
            FunctionKind::Input
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let mut config = framed_config();
        config.registers.insert(
            "mystery",
            RegisterDescriptor::new(1, RegisterType::Unknown("float16".to_string()))
                .with_function_kind(FunctionKind::State),
        );
        assert!(matches!(config.validate(), Err(EngineError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_register_past_block() {
        let mut config = framed_config();
        config.registers.insert(
            "too_far",
            RegisterDescriptor::new(143, RegisterType::Uint32).with_function_kind(FunctionKind::State),
        );
        assert!(config.validate().is_err());

        // Only v2 devices expose it, and their block is long enough.
        config.registers.insert(
            "too_far",
            RegisterDescriptor::new(143, RegisterType::Uint32)
                .with_function_kind(FunctionKind::State)
                .with_min_protocol_version(ProtocolVersion::V2),
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bank_mismatch() {
        let mut config = framed_config();
        config
            .registers
            .insert("modbus_reg", RegisterDescriptor::new(0, RegisterType::Uint16));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_modbus_register() {
        let mut config = framed_config();
        config.protocol = Protocol::default();
        config.alerts.clear();
        config.registers = RegisterMap::new()
            .with("model", RegisterDescriptor::new(0, RegisterType::Ascii(125)));
        assert!(config.validate().is_ok());

        config
            .registers
            .insert("model", RegisterDescriptor::new(0, RegisterType::Ascii(130)));
        assert!(matches!(config.validate(), Err(EngineError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_alert_bit_out_of_range() {
        let mut config = framed_config();
        config
            .alerts
            .insert(41, AlertGroup::new("battery").with_bit(16, "Impossible"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_undefined_waiting_key() {
        let mut config = framed_config();
        config.waiting_status = Some(WaitingStatus {
            key: "work_mode".to_string(),
            code: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_alert_map_from_json_keys() {
        let json = r#"{
            "name": "dev",
            "endpoint": { "type": "serial", "port": "COM3" },
            "registers": {},
            "alerts": { "40": { "category": "grid", "bits": { "0": "Grid Overvoltage" } } }
        }"#;
        let config = DeviceConfig::from_json(json).unwrap();
        assert_eq!(config.alerts[&40].bits[&0], "Grid Overvoltage");
    }
}
