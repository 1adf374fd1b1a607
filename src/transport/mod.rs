//! Instrument transport boundary.
//!
//! The command core only ever talks to hardware through the narrow
//! [`Transport`] trait: send a line, get a line back. Everything physical —
//! port opening, framing, parity — lives behind it.
//!
//! Implementations:
//! - [`serial::SerialTransport`] (feature `instrument_serial`) for RS-232 /
//!   USB-serial instruments,
//! - [`mock::MockTransport`] for tests,
//! - the simulated instruments in [`crate::instruments::sim`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ControlResult;

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

/// Half-duplex line transport to one instrument.
///
/// The owning driver serializes access: at most one call is in flight at any
/// time, and a command must complete before the next may start.
#[async_trait]
pub trait Transport: Send {
    /// Sends one line. Returns the number of payload bytes written.
    async fn write(&mut self, line: &str) -> ControlResult<usize>;

    /// Sends one line and reads one reply line (write-then-read).
    async fn query(&mut self, line: &str) -> ControlResult<String>;

    /// Reads one reply line without sending anything first.
    async fn read(&mut self) -> ControlResult<String>;
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Odd,
    Even,
    #[default]
    None,
}

/// Serial stop-bits setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Line termination appended to outgoing commands and expected on replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Termination {
    Cr,
    #[default]
    Lf,
    /// CR followed by LF.
    CrLf,
}

impl Termination {
    /// The terminator as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Cr => "\r",
            Termination::Lf => "\n",
            Termination::CrLf => "\r\n",
        }
    }

    /// The byte a reader watches for to end a reply line.
    pub fn delimiter(&self) -> u8 {
        match self {
            Termination::Cr => b'\r',
            Termination::Lf | Termination::CrLf => b'\n',
        }
    }
}

/// Physical-link parameters for one serial instrument.
///
/// Deserialized from the per-instrument config section and applied opaquely
/// by the serial transport at open time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub address: String,
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub termination: Termination,
}

fn default_data_bits() -> u8 {
    8
}
