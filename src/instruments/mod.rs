//! Instrument-specific command tables and simulators.
//!
//! Each instrument contributes a static descriptor table; [`registry_for`]
//! composes it (with the IEEE-488.2 common table where the instrument
//! speaks 488.2) into the registry a driver runs against, and
//! [`executor_config_for`] supplies the per-family executor tuning — the
//! SMS supply needs the unsolicited-status filter and a longer settle
//! delay, the Lakeshores do not.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::{CommandRegistry, ExecutorConfig};
use crate::error::ControlResult;

pub mod ls218;
pub mod ls350;
pub mod sim;
pub mod sms;

pub use ls218::LS218_COMMANDS;
pub use ls350::LS350_COMMANDS;
pub use sim::{SimLs218, SimSms};
pub use sms::SMS_COMMANDS;

/// The instrument families this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// Lakeshore 218 temperature monitor.
    Ls218,
    /// Lakeshore 350 temperature controller.
    Ls350,
    /// SMS-series magnet power supply.
    Sms,
}

/// Builds the command registry for an instrument family.
pub fn registry_for(kind: InstrumentKind) -> ControlResult<CommandRegistry> {
    use crate::command::ieee488::IEEE488_COMMON;
    match kind {
        InstrumentKind::Ls218 => CommandRegistry::from_tables(&[IEEE488_COMMON, LS218_COMMANDS]),
        InstrumentKind::Ls350 => CommandRegistry::from_tables(&[IEEE488_COMMON, LS350_COMMANDS]),
        // The SMS supply is not an IEEE-488.2 instrument.
        InstrumentKind::Sms => CommandRegistry::from_tables(&[SMS_COMMANDS]),
    }
}

/// Default executor tuning for an instrument family.
pub fn executor_config_for(kind: InstrumentKind) -> ExecutorConfig {
    match kind {
        InstrumentKind::Ls218 | InstrumentKind::Ls350 => ExecutorConfig::default(),
        InstrumentKind::Sms => ExecutorConfig {
            command_delay: Duration::from_millis(100),
            status_filter: Some(sms::is_status_update),
            ..ExecutorConfig::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::descriptor::placeholder_count;

    #[test]
    fn every_family_builds_a_registry() {
        for kind in [InstrumentKind::Ls218, InstrumentKind::Ls350, InstrumentKind::Sms] {
            let registry = registry_for(kind).unwrap();
            assert!(!registry.is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn every_registered_descriptor_keeps_the_arity_invariant() {
        for kind in [InstrumentKind::Ls218, InstrumentKind::Ls350, InstrumentKind::Sms] {
            let registry = registry_for(kind).unwrap();
            for descriptor in registry.iter() {
                assert_eq!(
                    descriptor.arity(),
                    placeholder_count(descriptor.args),
                    "{} in {kind:?}",
                    descriptor.name
                );
            }
        }
    }

    #[test]
    fn sms_executor_carries_the_status_filter() {
        let config = executor_config_for(InstrumentKind::Sms);
        assert!(config.status_filter.is_some());
        assert!(executor_config_for(InstrumentKind::Ls350).status_filter.is_none());
    }

    #[test]
    fn kind_deserializes_lowercase() {
        let kind: InstrumentKind = serde_json::from_str("\"ls350\"").unwrap();
        assert_eq!(kind, InstrumentKind::Ls350);
    }
}
