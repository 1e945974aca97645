use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    core::error::{EngineError, EngineResult},
    protocol::{framed::ProtocolVersion, modbus::MAX_READ_REGISTERS},
};

/// Tunable read parameters of a session.
///
/// Re-tuning never mutates a config in place: [`auto_adjust`] returns a new
/// value that replaces the active one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-operation read/write timeout (milliseconds)
    pub timeout_ms: u64,
    /// Pause between two read groups of one cycle (milliseconds)
    pub inter_read_delay_ms: u64,
    /// Largest number of words a single read may cover
    pub max_regs_per_read: u16,
    /// Retries after the first failed attempt of a read group
    pub max_retries_per_group: u32,
    /// Fixed pause between attempts of a read group (milliseconds)
    pub retry_backoff_ms: u64,
    /// Holes of at least this many words split a read group
    pub max_gap: u16,
    /// Consecutive waiting polls tolerated before forcing a reconnect
    pub max_waiting_polls: u32,
    /// Timeout of the pre-connection reachability probe (milliseconds)
    pub probe_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            inter_read_delay_ms: 100,
            max_regs_per_read: 100,
            max_retries_per_group: 2,
            retry_backoff_ms: 200,
            max_gap: 10,
            max_waiting_polls: 5,
            probe_timeout_ms: 2000,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn inter_read_delay(&self) -> Duration {
        Duration::from_millis(self.inter_read_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_regs_per_read == 0 || self.max_regs_per_read > MAX_READ_REGISTERS {
            return Err(EngineError::config(format!(
                "max_regs_per_read must be within 1..={}, got {}",
                MAX_READ_REGISTERS, self.max_regs_per_read
            )));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::config("timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// Parameters pinned by the user; [`auto_adjust`] leaves them alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inter_read_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_regs_per_read: Option<u16>,
}

impl ParamOverrides {
    /// `config` with every pinned parameter written over it.
    pub fn apply(&self, config: &SessionConfig) -> SessionConfig {
        SessionConfig {
            timeout_ms: self.timeout_ms.unwrap_or(config.timeout_ms),
            inter_read_delay_ms: self
                .inter_read_delay_ms
                .unwrap_or(config.inter_read_delay_ms),
            max_regs_per_read: self.max_regs_per_read.unwrap_or(config.max_regs_per_read),
            ..config.clone()
        }
    }
}

/// Tune read parameters to a measured round-trip time.
///
/// Worse links get smaller, slower and more patient reads:
/// - inter-read delay `rtt * 1.2 + 50ms`, clamped to 100..=1000 ms
/// - at most 45 words per read above 80 ms, 30 above 200 ms
/// - timeout `max(5s, 2 * delay + 2s)`
///
/// `configured` is the user's configuration with pins already applied.
pub fn auto_adjust(configured: &SessionConfig, pins: &ParamOverrides, rtt: Duration) -> SessionConfig {
    let rtt_ms = rtt.as_secs_f64() * 1000.0;

    let inter_read_delay_ms = match pins.inter_read_delay_ms {
        Some(pinned) => pinned,
        None => (rtt_ms * 1.2 + 50.0).clamp(100.0, 1000.0).round() as u64,
    };

    let max_regs_per_read = match pins.max_regs_per_read {
        Some(pinned) => pinned,
        None if rtt_ms > 200.0 => configured.max_regs_per_read.min(30),
        None if rtt_ms > 80.0 => configured.max_regs_per_read.min(45),
        None => configured.max_regs_per_read,
    };

    let timeout_ms = match pins.timeout_ms {
        Some(pinned) => pinned,
        None => (inter_read_delay_ms * 2 + 2000).max(5000),
    };

    SessionConfig {
        timeout_ms,
        inter_read_delay_ms,
        max_regs_per_read,
        ..configured.clone()
    }
}

/// Wire protocol spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Protocol {
    /// Modbus RTU over serial, Modbus TCP over the network.
    Modbus {
        #[serde(default = "default_unit_id")]
        unit_id: u8,
        /// Register table revision used for version gating.
        #[serde(default)]
        version: ProtocolVersion,
    },
    /// Vendor framed protocol.
    Framed {
        #[serde(default)]
        version: ProtocolVersion,
        #[serde(default)]
        target_address: u16,
    },
}

fn default_unit_id() -> u8 {
    1
}

impl Protocol {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Protocol::Modbus { version, .. } | Protocol::Framed { version, .. } => *version,
        }
    }

    pub fn is_framed(&self) -> bool {
        matches!(self, Protocol::Framed { .. })
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Modbus {
            unit_id: default_unit_id(),
            version: ProtocolVersion::default(),
        }
    }
}

/// Designates the status register and the value meaning "waiting".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingStatus {
    pub key: String,
    pub code: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_auto_adjust_fast_link() {
        let config = SessionConfig::default();
        let tuned = auto_adjust(&config, &ParamOverrides::default(), ms(20));
        assert_eq!(tuned.inter_read_delay_ms, 100);
        assert_eq!(tuned.max_regs_per_read, 100);
        assert_eq!(tuned.timeout_ms, 5000);
        assert_eq!(tuned.max_retries_per_group, config.max_retries_per_group);
    }

    #[test]
    fn test_auto_adjust_slow_link() {
        let config = SessionConfig::default();
        let tuned = auto_adjust(&config, &ParamOverrides::default(), ms(500));
        assert_eq!(tuned.inter_read_delay_ms, 650);
        assert_eq!(tuned.max_regs_per_read, 30);
        assert_eq!(tuned.timeout_ms, 5000);

        let very_slow = auto_adjust(&config, &ParamOverrides::default(), ms(2000));
        assert_eq!(very_slow.inter_read_delay_ms, 1000);
        assert_eq!(very_slow.timeout_ms, 5000);
    }

    #[test]
    fn test_auto_adjust_monotone_in_latency() {
        let config = SessionConfig::default();
        let pins = ParamOverrides::default();
        let fast = auto_adjust(&config, &pins, ms(50));
        let medium = auto_adjust(&config, &pins, ms(150));
        let slow = auto_adjust(&config, &pins, ms(250));

        assert!(fast.max_regs_per_read >= medium.max_regs_per_read);
        assert!(medium.max_regs_per_read >= slow.max_regs_per_read);
        assert_eq!(medium.max_regs_per_read, 45);
        assert_eq!(slow.max_regs_per_read, 30);
        assert!(fast.inter_read_delay_ms <= medium.inter_read_delay_ms);
        assert!(medium.inter_read_delay_ms <= slow.inter_read_delay_ms);
    }

    #[test]
    fn test_auto_adjust_respects_pins() {
        let pins = ParamOverrides {
            timeout_ms: Some(1500),
            inter_read_delay_ms: None,
            max_regs_per_read: Some(64),
        };
        let config = pins.apply(&SessionConfig::default());
        let tuned = auto_adjust(&config, &pins, ms(300));
        assert_eq!(tuned.timeout_ms, 1500);
        assert_eq!(tuned.max_regs_per_read, 64);
        assert_eq!(tuned.inter_read_delay_ms, 410);
    }

    #[test]
    fn test_validate_limits() {
        assert!(SessionConfig::default().validate().is_ok());

        let too_large = SessionConfig {
            max_regs_per_read: 200,
            ..SessionConfig::default()
        };
        assert!(matches!(too_large.validate(), Err(EngineError::Config { .. })));
    }

    #[test]
    fn test_protocol_deserialize() {
        let framed: Protocol = serde_json::from_str(r#"{ "kind": "framed", "version": 2 }"#).unwrap();
        assert_eq!(
            framed,
            Protocol::Framed {
                version: ProtocolVersion::V2,
                target_address: 0
            }
        );

        let modbus: Protocol = serde_json::from_str(r#"{ "kind": "modbus" }"#).unwrap();
        assert_eq!(modbus, Protocol::default());
    }
}
