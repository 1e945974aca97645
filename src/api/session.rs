use rmodbus::ModbusProto;
use std::{
    collections::{BTreeMap, HashMap},
    io::{Read, Write},
    sync::Arc,
    time::Instant,
};
use strum::Display;

use crate::{
    api::{
        config::{self, ParamOverrides, Protocol, SessionConfig, WaitingStatus},
        transport::{Link, Transport},
    },
    core::{
        error::{EngineError, EngineResult},
        snapshot::{CycleOutcome, CycleStats, Snapshot},
    },
    protocol::{
        framed::{self, RequestKind},
        modbus,
        planner::{plan, ReadGroup},
        register::{decode_at, Reading, RegisterMap, Value},
    },
    utils::{sleep_for, to_hex_string},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Disconnected,
    Probing,
    Connected,
    Reading,
    Retrying,
    Disconnecting,
}

/// Connection to one device and the read plan executed over it.
///
/// All I/O is blocking and bounded by the active timeout; a session is driven
/// from a single thread.
pub struct Session {
    link: Box<dyn Link>,
    protocol: Protocol,
    registers: Arc<RegisterMap>,

    /// User configuration with pins applied; the base every re-tune starts from.
    configured: SessionConfig,
    pins: ParamOverrides,
    active: SessionConfig,
    plan: Vec<ReadGroup>,

    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    has_connected: bool,

    waiting: Option<WaitingStatus>,
    consecutive_waiting_polls: u32,
    last_good: Option<Snapshot>,

    /// Framed blocks already fetched during the current cycle.
    block_cache: HashMap<RequestKind, Vec<u16>>,
    stats: CycleStats,
}

impl Session {
    pub fn new(
        link: Box<dyn Link>,
        protocol: Protocol,
        registers: Arc<RegisterMap>,
        config: SessionConfig,
        pins: ParamOverrides,
    ) -> EngineResult<Self> {
        let configured = pins.apply(&config);
        configured.validate()?;

        let mut session = Self {
            link,
            protocol,
            registers,
            active: configured.clone(),
            configured,
            pins,
            plan: Vec::new(),
            transport: None,
            state: SessionState::Disconnected,
            has_connected: false,
            waiting: None,
            consecutive_waiting_polls: 0,
            last_good: None,
            block_cache: HashMap::new(),
            stats: CycleStats::default(),
        };
        session.rebuild_plan();
        Ok(session)
    }

    /// Enable the waiting-state breaker on the given status register.
    pub fn with_waiting_status(mut self, waiting: WaitingStatus) -> Self {
        self.waiting = Some(waiting);
        self
    }

    /// Open the transport. A no-op while connected.
    ///
    /// Network links are probed first; the probe's round trip re-tunes the
    /// active configuration before the transport is opened with it.
    pub fn connect(&mut self) -> EngineResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.transport.is_some() {
            log::debug!("Tearing down stale transport to {}", self.link.describe());
            self.disconnect();
        }

        self.state = SessionState::Probing;
        if self.link.is_network() {
            let rtt = match self.link.probe(self.active.probe_timeout()) {
                Ok(rtt) => rtt,
                Err(err) => {
                    self.state = SessionState::Disconnected;
                    log::warn!("Probe of {} failed: {}", self.link.describe(), err);
                    return Err(err);
                }
            };
            self.stats.last_rtt = Some(rtt);
            self.auto_adjust(rtt);
        }

        let mut transport = match self.link.open(self.active.timeout()) {
            Ok(transport) => transport,
            Err(err) => {
                self.state = SessionState::Disconnected;
                log::warn!("Failed to open {}: {}", self.link.describe(), err);
                return Err(err);
            }
        };
        if let Err(err) = transport.set_timeout(self.active.timeout()) {
            self.state = SessionState::Disconnected;
            return Err(err);
        }

        log::info!(
            "Connected to {} ({} groups, timeout {}ms)",
            transport.describe(),
            self.plan.len(),
            self.active.timeout_ms
        );
        self.transport = Some(transport);
        self.state = SessionState::Connected;
        if self.has_connected {
            self.stats.reconnects += 1;
        }
        self.has_connected = true;
        Ok(())
    }

    /// Close the transport if any. Close errors are logged and swallowed.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            self.state = SessionState::Disconnecting;
            let name = transport.describe();
            match transport.close() {
                Ok(()) => log::info!("Disconnected from {}", name),
                Err(err) => log::warn!("Error while closing {}: {}", name, err),
            }
        }
        self.state = SessionState::Disconnected;
        self.consecutive_waiting_polls = 0;
        self.block_cache.clear();
    }

    /// Re-tune timing and batch size from a measured round trip.
    ///
    /// Only network links are tuned and pinned parameters are left alone.
    /// Returns whether the plan had to be rebuilt.
    pub fn auto_adjust(&mut self, rtt: std::time::Duration) -> bool {
        if !self.link.is_network() {
            return false;
        }

        let tuned = config::auto_adjust(&self.configured, &self.pins, rtt);
        let regs_changed = tuned.max_regs_per_read != self.active.max_regs_per_read;
        log::debug!(
            "RTT {:?}: delay {}ms, max regs {}, timeout {}ms",
            rtt,
            tuned.inter_read_delay_ms,
            tuned.max_regs_per_read,
            tuned.timeout_ms
        );
        self.active = tuned;

        if let Some(transport) = self.transport.as_mut() {
            if let Err(err) = transport.set_timeout(self.active.timeout()) {
                log::warn!("Failed to apply new timeout: {}", err);
            }
        }
        if regs_changed {
            self.rebuild_plan();
        }
        regs_changed
    }

    /// Plan every register the device's protocol version exposes.
    pub fn rebuild_plan(&mut self) {
        self.plan = plan(
            self.registers.available_in(self.protocol.version()),
            self.active.max_regs_per_read,
            self.active.max_gap,
        );
        log::debug!(
            "Planned {} reads: {}",
            self.plan.len(),
            self.plan
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    /// Read and decode one group, retrying communication failures.
    ///
    /// Once retries run out the session is disconnected and
    /// [`EngineError::FatalRead`] is returned.
    pub fn read_group(&mut self, group: &ReadGroup) -> EngineResult<BTreeMap<String, Reading>> {
        let words = self.fetch_group(group)?;

        let values = group
            .keys
            .iter()
            .filter_map(|key| {
                let descriptor = self.registers.get(key)?;
                let reading = decode_at(&words, group.start_address, descriptor);
                if let Err(err) = &reading {
                    log::warn!("Failed to decode '{}': {}", key, err);
                }
                Some((key.clone(), reading))
            })
            .collect();
        Ok(values)
    }

    /// Execute the whole plan and publish its values as one snapshot.
    ///
    /// Connects first when disconnected. A failed cycle yields no values.
    /// While the device reports its waiting status the last good snapshot is
    /// returned instead; too many waiting polls in a row force a reconnect.
    pub fn read_cycle(&mut self) -> EngineResult<CycleOutcome> {
        if let Err(err) = self.connect() {
            self.stats.cycles_failed += 1;
            return Err(err);
        }

        let started = Instant::now();
        self.block_cache.clear();
        let groups = self.plan.clone();
        let mut snapshot = Snapshot::default();

        for (index, group) in groups.iter().enumerate() {
            if index > 0 {
                sleep_for(self.active.inter_read_delay());
            }
            match self.read_group(group) {
                Ok(values) => snapshot.values.extend(values),
                Err(err) => {
                    self.block_cache.clear();
                    self.stats.cycles_failed += 1;
                    return Err(err);
                }
            }
        }
        self.block_cache.clear();
        self.collect_bitfields(&mut snapshot);
        self.stats.last_cycle = Some(started.elapsed());

        if self.is_waiting(&snapshot) {
            return self.handle_waiting(snapshot);
        }

        self.consecutive_waiting_polls = 0;
        self.last_good = Some(snapshot.clone());
        self.stats.cycles_ok += 1;
        Ok(CycleOutcome::Fresh(snapshot))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
            && matches!(
                self.state,
                SessionState::Connected | SessionState::Reading | SessionState::Retrying
            )
    }

    /// Configuration currently in effect.
    pub fn config(&self) -> &SessionConfig {
        &self.active
    }

    /// Configuration as given by the user, pins applied.
    pub fn configured(&self) -> &SessionConfig {
        &self.configured
    }

    pub fn plan(&self) -> &[ReadGroup] {
        &self.plan
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn registers(&self) -> &RegisterMap {
        &self.registers
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn last_good(&self) -> Option<&Snapshot> {
        self.last_good.as_ref()
    }

    pub fn consecutive_waiting_polls(&self) -> u32 {
        self.consecutive_waiting_polls
    }

    pub fn describe(&self) -> String {
        self.link.describe()
    }

    fn fetch_group(&mut self, group: &ReadGroup) -> EngineResult<Vec<u16>> {
        if self.transport.is_none() {
            return Err(EngineError::NotConnected);
        }

        let max_attempts = self.active.max_retries_per_group + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.state = SessionState::Reading;
            match self.read_once(group) {
                Ok(words) => {
                    self.state = SessionState::Connected;
                    return Ok(words);
                }
                Err(err) if !err.is_retryable() => {
                    self.state = SessionState::Connected;
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    log::error!(
                        "Read of {} failed after {} attempts: {}",
                        group,
                        attempt,
                        err
                    );
                    self.disconnect();
                    return Err(EngineError::FatalRead {
                        group: group.to_string(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => {
                    log::warn!(
                        "Read of {} failed (attempt {}/{}): {}",
                        group,
                        attempt,
                        max_attempts,
                        err
                    );
                    self.state = SessionState::Retrying;
                    sleep_for(self.active.retry_backoff());
                    if let Some(transport) = self.transport.as_mut() {
                        if let Err(err) = transport.clear_input() {
                            log::debug!("Failed to purge input before retry: {}", err);
                        }
                    }
                }
            }
        }
    }

    /// One bounded attempt at the words of `group`, starting at its start address.
    fn read_once(&mut self, group: &ReadGroup) -> EngineResult<Vec<u16>> {
        match group.function_kind.request_kind() {
            Some(kind) => {
                let block = self.read_framed_block(kind)?;
                let start = usize::from(group.start_address).min(block.len());
                let end = (start + usize::from(group.total_word_count)).min(block.len());
                Ok(block[start..end].to_vec())
            }
            None => self.read_modbus(group),
        }
    }

    fn read_framed_block(&mut self, kind: RequestKind) -> EngineResult<Vec<u16>> {
        if let Some(block) = self.block_cache.get(&kind) {
            return Ok(block.clone());
        }

        let Protocol::Framed {
            version,
            target_address,
        } = self.protocol
        else {
            return Err(EngineError::config(format!(
                "{kind} block requested from a Modbus device"
            )));
        };
        let transport = self.transport.as_mut().ok_or(EngineError::NotConnected)?;

        let request = framed::build_request_to(kind, version, target_address);
        log::debug!("Sending {} request: {}", kind, to_hex_string(&request));
        transport.write_all(&request)?;
        transport.flush()?;

        let mut response = vec![0u8; kind.response_len(version)];
        transport.read_exact(&mut response)?;
        log::debug!("Received {} response: {}", kind, to_hex_string(&response));

        let words = framed::parse_response(&response, response.len())
            .ok_or_else(|| EngineError::framing(format!("invalid response to {kind} request")))?;
        let block: Vec<u16> = words.into_values().collect();
        self.block_cache.insert(kind, block.clone());
        Ok(block)
    }

    fn read_modbus(&mut self, group: &ReadGroup) -> EngineResult<Vec<u16>> {
        let Protocol::Modbus { unit_id, .. } = self.protocol else {
            return Err(EngineError::config(format!(
                "{} bank requested from a framed device",
                group.function_kind
            )));
        };
        if group.total_word_count > modbus::MAX_READ_REGISTERS {
            return Err(EngineError::config(format!(
                "{group} exceeds the Modbus limit of {} registers per read",
                modbus::MAX_READ_REGISTERS
            )));
        }
        let proto = if self.link.is_network() {
            ModbusProto::TcpUdp
        } else {
            ModbusProto::Rtu
        };
        let transport = self.transport.as_mut().ok_or(EngineError::NotConnected)?;

        let (request, raw) = modbus::generate_read_request(
            group.function_kind,
            unit_id,
            proto,
            group.start_address,
            group.total_word_count,
        )?;
        log::debug!("Sending Modbus request: {}", to_hex_string(&raw));
        transport.write_all(&raw)?;
        transport.flush()?;

        let response = modbus::read_modbus_frame(&mut **transport, proto)?;
        modbus::parse_read_response(
            group.function_kind,
            &request,
            proto,
            &response,
            group.total_word_count,
        )
    }

    fn collect_bitfields(&self, snapshot: &mut Snapshot) {
        for (key, reading) in &snapshot.values {
            let Some(descriptor) = self.registers.get(key) else {
                continue;
            };
            if !descriptor.is_bitfield() {
                continue;
            }
            let Ok(Value::Int(raw)) = reading else {
                continue;
            };
            // Each word keeps its own address, high word first.
            let words = descriptor.word_count();
            for offset in 0..words {
                let Some(address) = descriptor.address.checked_add(offset) else {
                    break;
                };
                let shift = 16 * u32::from(words - 1 - offset);
                let word = ((*raw as u64) >> shift) as u16;
                snapshot.bitfields.insert(address, word);
            }
        }
    }

    fn is_waiting(&self, snapshot: &Snapshot) -> bool {
        self.waiting.as_ref().is_some_and(|waiting| {
            snapshot
                .value(&waiting.key)
                .and_then(Value::as_i64)
                .is_some_and(|status| status == waiting.code)
        })
    }

    fn handle_waiting(&mut self, snapshot: Snapshot) -> EngineResult<CycleOutcome> {
        self.consecutive_waiting_polls += 1;
        let polls = self.consecutive_waiting_polls;
        log::info!("Device {} is waiting ({} polls)", self.link.describe(), polls);

        if polls > self.active.max_waiting_polls {
            log::warn!(
                "Device {} stuck waiting for {} polls, forcing reconnect",
                self.link.describe(),
                polls
            );
            self.disconnect();
            if let Err(err) = self.connect() {
                log::error!("Reconnect after waiting timeout failed: {}", err);
                self.stats.cycles_failed += 1;
                return Err(EngineError::StuckWaiting { polls });
            }
        }

        match &self.last_good {
            Some(last_good) => {
                self.stats.cycles_cached += 1;
                Ok(CycleOutcome::Cached(last_good.clone()))
            }
            None => {
                self.stats.cycles_ok += 1;
                Ok(CycleOutcome::Fresh(snapshot))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}
