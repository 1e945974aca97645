use derive_more::{Display, Error};

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the engine.
///
/// Framing, communication, I/O and exception errors are retried per read group;
/// everything else is surfaced to the caller immediately.
#[derive(Debug, Display, Error)]
pub enum EngineError {
    /// Length, tag or CRC mismatch; the frame is treated as no data.
    #[display("framing error: {reason}")]
    Framing { reason: String },

    /// Timeout, short read or any other link-level failure.
    #[display("communication error: {reason}")]
    Communication { reason: String },

    #[display("I/O error: {source}")]
    Io { source: std::io::Error },

    /// Modbus exception response.
    #[display("Modbus exception 0x{code:02X}: {description}")]
    Exception { code: u8, description: &'static str },

    /// A read group kept failing until retries ran out; the session has been disconnected.
    #[display("read of {group} failed after {attempts} attempts: {last_error}")]
    FatalRead {
        group: String,
        attempts: u32,
        last_error: String,
    },

    #[display("session is not connected")]
    NotConnected,

    /// The host answered the reachability check but the port refused the connection.
    #[display("{host}:{port} is not accepting connections though the host is reachable: {reason}")]
    PortClosed {
        host: String,
        port: u16,
        reason: String,
    },

    /// Neither the port nor the host could be reached.
    #[display("host {host} is unreachable (port {port}: {port_error}; reachability check: {reason})")]
    HostUnreachable {
        host: String,
        port: u16,
        port_error: String,
        reason: String,
    },

    #[display("invalid request kind: {kind}")]
    InvalidRequestKind { kind: String },

    #[display("configuration error: {reason}")]
    Config { reason: String },

    /// The device reported its waiting status for too many consecutive polls.
    #[display("device stuck in waiting state for {polls} polls")]
    StuckWaiting { polls: u32 },
}

impl EngineError {
    pub fn communication(reason: impl Into<String>) -> Self {
        Self::Communication {
            reason: reason.into(),
        }
    }

    pub fn framing(reason: impl Into<String>) -> Self {
        Self::Framing {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether a read group should be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Framing { .. } | Self::Communication { .. } | Self::Io { .. } | Self::Exception { .. }
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}
