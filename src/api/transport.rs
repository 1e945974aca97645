use serde::{Deserialize, Serialize};
use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::core::error::{EngineError, EngineResult};

/// A byte stream to one device.
pub trait Transport: Read + Write + Send {
    /// Bound every subsequent read and write by `timeout`.
    fn set_timeout(&mut self, timeout: Duration) -> EngineResult<()>;

    /// Discard any bytes already received but not yet read.
    fn clear_input(&mut self) -> EngineResult<()>;

    fn close(&mut self) -> EngineResult<()>;

    fn describe(&self) -> String;
}

/// Opens transports to one endpoint.
pub trait Link: Send {
    /// Network links are probed before opening and re-tuned from the probe RTT.
    fn is_network(&self) -> bool;

    /// Check that the endpoint accepts connections and measure the round trip.
    fn probe(&mut self, timeout: Duration) -> EngineResult<Duration>;

    fn open(&mut self, timeout: Duration) -> EngineResult<Box<dyn Transport>>;

    fn describe(&self) -> String;
}

/// Where a device lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Endpoint {
    Serial {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    Tcp {
        host: String,
        port: u16,
    },
}

fn default_baud_rate() -> u32 {
    9600
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Serial { port, baud_rate } => write!(f, "{port}@{baud_rate}"),
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Serial line, 8-N-1.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `port` with the requested timeout, enabling exclusive access on Unix systems.
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> EngineResult<Self> {
        let builder = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout);

        #[cfg(unix)]
        let handle: Box<dyn SerialPort> = {
            let mut handle = builder.open_native().map_err(|err| {
                EngineError::communication(format!("failed to open port {port}: {err}"))
            })?;
            handle.set_exclusive(true).map_err(|err| {
                EngineError::communication(format!(
                    "failed to acquire exclusive access to {port}: {err}"
                ))
            })?;
            Box::new(handle)
        };

        #[cfg(not(unix))]
        let handle = builder.open().map_err(|err| {
            EngineError::communication(format!("failed to open port {port}: {err}"))
        })?;

        Ok(Self {
            name: port.to_string(),
            port: handle,
        })
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn set_timeout(&mut self, timeout: Duration) -> EngineResult<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|err| EngineError::communication(format!("{}: {err}", self.name)))
    }

    fn clear_input(&mut self) -> EngineResult<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|err| EngineError::communication(format!("{}: {err}", self.name)))
    }

    fn close(&mut self) -> EngineResult<()> {
        // The handle is released on drop; only pending output needs attention here.
        self.port.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

pub struct TcpTransport {
    peer: String,
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> EngineResult<Self> {
        let stream = connect_with_timeout(host, port, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self {
            peer: format!("{host}:{port}"),
            stream,
        })
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn set_timeout(&mut self, timeout: Duration) -> EngineResult<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn clear_input(&mut self) -> EngineResult<()> {
        self.stream.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let drained = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Err(EngineError::communication("connection closed by peer")),
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(err) => break Err(err.into()),
            }
        };
        self.stream.set_nonblocking(false)?;
        drained
    }

    fn close(&mut self) -> EngineResult<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self) -> String {
        self.peer.clone()
    }
}

fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = io::Error::new(
        io::ErrorKind::NotFound,
        format!("{host} did not resolve to any address"),
    );
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_error = err,
        }
    }
    Err(last_error)
}

/// The real [`Link`] behind an [`Endpoint`].
#[derive(Debug, Clone)]
pub struct EndpointLink {
    endpoint: Endpoint,
}

impl EndpointLink {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Link for EndpointLink {
    fn is_network(&self) -> bool {
        matches!(self.endpoint, Endpoint::Tcp { .. })
    }

    fn probe(&mut self, timeout: Duration) -> EngineResult<Duration> {
        let Endpoint::Tcp { host, port } = &self.endpoint else {
            return Ok(Duration::ZERO);
        };

        let started = Instant::now();
        match connect_with_timeout(host, *port, timeout) {
            Ok(stream) => {
                let rtt = started.elapsed();
                let _ = stream.shutdown(Shutdown::Both);
                log::debug!("Probe of {}:{} answered in {:?}", host, port, rtt);
                Ok(rtt)
            }
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                Err(EngineError::PortClosed {
                    host: host.clone(),
                    port: *port,
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                log::warn!(
                    "Port {} on {} did not answer ({}), checking host reachability",
                    port,
                    host,
                    err
                );
                match ping(host, timeout) {
                    Ok(()) => Err(EngineError::PortClosed {
                        host: host.clone(),
                        port: *port,
                        reason: err.to_string(),
                    }),
                    Err(reason) => Err(EngineError::HostUnreachable {
                        host: host.clone(),
                        port: *port,
                        port_error: err.to_string(),
                        reason,
                    }),
                }
            }
        }
    }

    fn open(&mut self, timeout: Duration) -> EngineResult<Box<dyn Transport>> {
        match &self.endpoint {
            Endpoint::Serial { port, baud_rate } => {
                Ok(Box::new(SerialTransport::open(port, *baud_rate, timeout)?))
            }
            Endpoint::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(host, *port, timeout)?)),
        }
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

/// Best-effort ICMP reachability check through the system `ping`.
fn ping(host: &str, timeout: Duration) -> Result<(), String> {
    let mut command = Command::new("ping");

    #[cfg(windows)]
    command
        .args(["-n", "1", "-w"])
        .arg(timeout.as_millis().max(1).to_string());

    #[cfg(not(windows))]
    command
        .args(["-c", "1", "-W"])
        .arg(timeout.as_secs().max(1).to_string());

    let status = command
        .arg(host)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|err| format!("cannot run ping: {err}"))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("ping exited with {status}"))
    }
}
