use std::{collections::BTreeMap, time::Duration};

use crate::protocol::register::{Reading, Value};

/// Decoded output of one complete read cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Every planned key with its decoded value or per-field error.
    pub values: BTreeMap<String, Reading>,
    /// Raw words of `Bitfield` registers by address, for alert decoding.
    pub bitfields: BTreeMap<u16, u16>,
}

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<&Reading> {
        self.values.get(key)
    }

    /// The decoded value of `key`, if it decoded successfully.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(|reading| reading.as_ref().ok())
    }

    /// Number of fields that failed to decode.
    pub fn error_count(&self) -> usize {
        self.values.values().filter(|reading| reading.is_err()).count()
    }
}

/// Result of a successful read cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Values read during this cycle.
    Fresh(Snapshot),
    /// The device reported its waiting status; these are the last good values.
    Cached(Snapshot),
}

impl CycleOutcome {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            CycleOutcome::Fresh(snapshot) | CycleOutcome::Cached(snapshot) => snapshot,
        }
    }

    pub fn into_snapshot(self) -> Snapshot {
        match self {
            CycleOutcome::Fresh(snapshot) | CycleOutcome::Cached(snapshot) => snapshot,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, CycleOutcome::Cached(_))
    }
}

/// Running counters of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles_ok: u64,
    pub cycles_cached: u64,
    pub cycles_failed: u64,
    pub reconnects: u64,
    pub last_rtt: Option<Duration>,
    pub last_cycle: Option<Duration>,
}
