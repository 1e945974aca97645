//! Device sessions
//!
//! A [`Session`] owns the transport to one device, executes the read plan
//! group by group with bounded retries, re-tunes itself from measured
//! latency and guards against devices stuck in a waiting state.
//!
//! ```no_run
//! use invpoll::api::{Endpoint, Protocol, SessionBuilder};
//! use invpoll::protocol::{RegisterDescriptor, RegisterMap, RegisterType};
//!
//! let registers = RegisterMap::new().with(
//!     "battery_voltage",
//!     RegisterDescriptor::new(0x100, RegisterType::Uint16).with_scale(0.1).with_unit("V"),
//! );
//! let mut session = SessionBuilder::for_endpoint(Endpoint::Tcp {
//!     host: "192.168.1.50".to_string(),
//!     port: 502,
//! })
//! .with_protocol(Protocol::default())
//! .with_registers(registers)
//! .build()?;
//!
//! let outcome = session.read_cycle()?;
//! println!("{:?}", outcome.snapshot().value("battery_voltage"));
//! # Ok::<(), invpoll::core::EngineError>(())
//! ```

pub mod config;
pub mod session;
pub mod transport;

use std::sync::Arc;

use crate::{core::error::EngineResult, protocol::register::RegisterMap};

pub use config::{auto_adjust, ParamOverrides, Protocol, SessionConfig, WaitingStatus};
pub use session::{Session, SessionState};
pub use transport::{Endpoint, EndpointLink, Link, SerialTransport, TcpTransport, Transport};

/// Builder for creating a [`Session`].
pub struct SessionBuilder {
    link: Box<dyn Link>,
    protocol: Protocol,
    registers: Arc<RegisterMap>,
    config: SessionConfig,
    overrides: ParamOverrides,
    waiting: Option<WaitingStatus>,
}

impl SessionBuilder {
    /// Start from any [`Link`] implementation.
    pub fn new(link: Box<dyn Link>) -> Self {
        Self {
            link,
            protocol: Protocol::default(),
            registers: Arc::new(RegisterMap::new()),
            config: SessionConfig::default(),
            overrides: ParamOverrides::default(),
            waiting: None,
        }
    }

    /// Start from a serial or TCP endpoint.
    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Self::new(Box::new(EndpointLink::new(endpoint)))
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_registers(mut self, registers: RegisterMap) -> Self {
        self.registers = Arc::new(registers);
        self
    }

    /// Share an already loaded register table.
    pub fn with_shared_registers(mut self, registers: Arc<RegisterMap>) -> Self {
        self.registers = registers;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Pin parameters so latency-based tuning leaves them alone.
    pub fn with_overrides(mut self, overrides: ParamOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_waiting_status(mut self, key: &str, code: i64) -> Self {
        self.waiting = Some(WaitingStatus {
            key: key.to_string(),
            code,
        });
        self
    }

    pub fn build(self) -> EngineResult<Session> {
        let session = Session::new(
            self.link,
            self.protocol,
            self.registers,
            self.config,
            self.overrides,
        )?;
        Ok(match self.waiting {
            Some(waiting) => session.with_waiting_status(waiting),
            None => session,
        })
    }
}
