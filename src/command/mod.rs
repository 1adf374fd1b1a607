//! Command dispatch core.
//!
//! Instrument commands are declared as data — name, templates, kind,
//! validator, parser — in static [`descriptor`] tables, collected per driver
//! into a [`registry`], and run by the generic [`executor`] against a
//! half-duplex transport. The [`ieee488`] table carries the IEEE-488.2
//! common commands shared by compliant instruments.

pub mod descriptor;
pub mod executor;
pub mod ieee488;
pub mod registry;

pub use descriptor::{CommandDescriptor, CommandKind, ResponseParser, Validator};
pub use executor::{split_line, CommandExecutor, ExecutorConfig, StatusFilter};
pub use registry::CommandRegistry;
