//! Serial transport for RS-232/USB-serial instruments.
//!
//! Wraps the `serialport` crate and runs the blocking I/O on Tokio's
//! blocking executor. Reads are byte-wise until the configured termination
//! delimiter, with a short internal port timeout so an overall deadline can
//! be enforced by the caller.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serialport::SerialPort;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::transport::{Parity, SerialSettings, StopBits, Transport};

/// Internal port read timeout; the per-command deadline lives in the
/// executor, this just keeps individual `read` calls from parking forever.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on a single reply line; a runaway instrument should fail,
/// not exhaust memory.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Serial line transport.
///
/// The port lives behind `Arc<Mutex<..>>` so the blocking closures can take
/// it onto the blocking thread pool while the transport itself stays movable
/// into a driver task.
pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("settings", &self.settings)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

impl SerialTransport {
    /// Creates an unconnected transport; call [`open`](Self::open) before use.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    /// Opens the port with the configured framing parameters.
    pub fn open(settings: SerialSettings) -> ControlResult<Self> {
        let data_bits = match settings.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(ControlError::Configuration(format!(
                    "Unsupported data bits: {other}"
                )))
            }
        };
        let parity = match settings.parity {
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
            Parity::None => serialport::Parity::None,
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };

        let port = serialport::new(&settings.address, settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(PORT_READ_TIMEOUT)
            .open()
            .map_err(|e| {
                ControlError::Transport(format!(
                    "Failed to open serial port '{}' at {} baud: {e}",
                    settings.address, settings.baud_rate
                ))
            })?;

        debug!(
            port = %settings.address,
            baud = settings.baud_rate,
            "Serial port opened"
        );

        Ok(Self {
            port: Some(Arc::new(Mutex::new(port))),
            settings,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn port_handle(&self) -> ControlResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or(ControlError::NotConnected)
    }

    async fn write_line(&self, line: &str) -> ControlResult<usize> {
        let handle = self.port_handle()?;
        let payload = format!("{}{}", line, self.settings.termination.as_str());
        let logged = line.to_string();

        let written = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let mut port = handle.blocking_lock();
            port.write_all(payload.as_bytes())
                .context("Failed to write to serial port")?;
            port.flush().context("Failed to flush serial port")?;
            Ok(payload.len())
        })
        .await
        .map_err(|e| ControlError::Transport(format!("Serial I/O task panicked: {e}")))?
        .map_err(|e| ControlError::Transport(e.to_string()))?;

        debug!(line = %logged, "Sent serial command");
        Ok(written)
    }

    async fn read_line(&self) -> ControlResult<String> {
        let handle = self.port_handle()?;
        let delimiter = self.settings.termination.delimiter();

        let response = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let mut port = handle.blocking_lock();
            let mut response = Vec::new();
            let mut buf = [0u8; 1];

            loop {
                match port.read(&mut buf) {
                    Ok(1) => {
                        if buf[0] == delimiter {
                            break;
                        }
                        response.push(buf[0]);
                        if response.len() > MAX_RESPONSE_BYTES {
                            anyhow::bail!("Serial response exceeded {MAX_RESPONSE_BYTES} bytes");
                        }
                    }
                    Ok(0) => anyhow::bail!("Unexpected EOF from serial port"),
                    // The port timeout is shorter than the caller's deadline;
                    // keep reading until the caller gives up.
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => anyhow::bail!("Serial read error: {e}"),
                    Ok(_) => unreachable!("single-byte read returned more than one byte"),
                }
            }

            let text = String::from_utf8_lossy(&response)
                .trim_end_matches('\r')
                .to_string();
            Ok(text)
        })
        .await
        .map_err(|e| ControlError::Transport(format!("Serial I/O task panicked: {e}")))?
        .map_err(|e| ControlError::Transport(e.to_string()))?;

        debug!(line = %response, "Received serial response");
        Ok(response)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&mut self, line: &str) -> ControlResult<usize> {
        self.write_line(line).await
    }

    async fn query(&mut self, line: &str) -> ControlResult<String> {
        self.write_line(line).await?;
        self.read_line().await
    }

    async fn read(&mut self) -> ControlResult<String> {
        self.read_line().await
    }
}
