//! # Cryostat Instrument Control
//!
//! Core library for operating cryostat laboratory instruments (Lakeshore
//! temperature monitors/controllers, SMS-series magnet power supplies) over
//! serial links, exposing each instrument through a message-envelope RPC
//! front end and coordinating multi-instrument procedures with a small
//! state machine.
//!
//! ## Crate Structure
//!
//! - **`command`**: the command-dispatch core — declarative command
//!   descriptors, the per-driver registry, and the generic executor that
//!   validates, formats, sends and parses traffic against a half-duplex
//!   textual protocol.
//! - **`transport`**: the narrow hardware boundary (`write`/`query`/`read`
//!   of text lines) with serial and mock implementations.
//! - **`protocol`**: the request/reply envelope exchanged with a driver,
//!   carrying timing and error metadata alongside the payload.
//! - **`driver`**: the per-instrument driver task — the strictly
//!   single-threaded serializer owning one transport — and its cloneable
//!   handle.
//! - **`instruments`**: the instrument-specific command tables (LS218,
//!   LS350, SMS) plus simulated instruments for tests and hardware-free
//!   runs.
//! - **`sequence`**: the sequencing state machine and the magnet-ramp
//!   controller built on it.
//! - **`config`**: TOML settings for driver processes and the magnet
//!   controller.
//! - **`error`**: the crate-wide error enum.

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod instruments;
pub mod protocol;
pub mod sequence;
pub mod transport;

pub use driver::{DriverHandle, InstrumentDriver};
pub use error::{ControlError, ControlResult};
pub use protocol::{CommandResult, Method, Reply, Request};
