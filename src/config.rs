//! Configuration management.
//!
//! Settings are loaded from a TOML file via the `config` crate and
//! validated after deserialization. One file describes every instrument
//! process (queue name, serial parameters, executor tuning) plus the
//! optional magnet-controller section.
//!
//! ```toml
//! [instruments.magnet_psu]
//! kind = "sms"
//! queue = "SMS.driver"
//! command_delay = "100ms"
//!
//! [instruments.magnet_psu.serial]
//! address = "/dev/ttyUSB1"
//! baud_rate = 9600
//! data_bits = 8
//! parity = "none"
//!
//! [magnet]
//! power_supply = "magnet_psu"
//! temperature_monitor = "cryostat_monitor"
//! temperature_channel = "5"
//! safe_temperatures = [[0.0, 6.5], [2.0, 5.5], [5.0, 4.5]]
//! target_field = 2.0
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::Config;
use serde::{Deserialize, Serialize};

use crate::command::ExecutorConfig;
use crate::error::{ControlError, ControlResult};
use crate::instruments::{executor_config_for, InstrumentKind};
use crate::transport::SerialSettings;

/// Top-level settings file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub instruments: HashMap<String, InstrumentSettings>,
    pub magnet: Option<MagnetSettings>,
}

/// One instrument driver process.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSettings {
    pub kind: InstrumentKind,
    /// Request queue name this driver answers on.
    pub queue: String,
    pub serial: SerialSettings,
    /// Settle delay after write commands; family default when absent.
    #[serde(default, with = "humantime_serde::option")]
    pub command_delay: Option<Duration>,
    /// Per-command reply deadline; family default when absent.
    #[serde(default, with = "humantime_serde::option")]
    pub reply_timeout: Option<Duration>,
}

impl InstrumentSettings {
    /// Executor tuning: the family defaults overridden by the file.
    pub fn executor_config(&self) -> ExecutorConfig {
        let mut config = executor_config_for(self.kind);
        if let Some(delay) = self.command_delay {
            config.command_delay = delay;
        }
        if let Some(timeout) = self.reply_timeout {
            config.reply_timeout = timeout;
        }
        config
    }
}

/// Magnet-ramp controller section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagnetSettings {
    /// Instrument id (key in `[instruments]`) of the power supply.
    pub power_supply: String,
    /// Instrument id of the temperature monitor.
    pub temperature_monitor: String,
    /// Monitor input wired to the magnet, e.g. `"5"`.
    pub temperature_channel: String,
    /// `(field tesla, max safe temperature kelvin)` pairs, ascending field.
    pub safe_temperatures: Vec<[f64; 2]>,
    /// Ramp target in tesla.
    pub target_field: f64,
    /// How close the output must get to the target to count as done.
    #[serde(default = "default_field_tolerance")]
    pub field_tolerance: f64,
    /// How long the persistent-mode switch heater must be hot before the
    /// magnet may ramp.
    #[serde(default = "default_switch_time", with = "humantime_serde")]
    pub switch_warm_time: Duration,
    /// Cool-down guard after a ramp, before returning to idle.
    #[serde(default = "default_switch_time", with = "humantime_serde")]
    pub switch_cool_time: Duration,
    /// State-machine tick interval.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_field_tolerance() -> f64 {
    0.01
}

fn default_switch_time() -> Duration {
    Duration::from_secs(20)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

impl Settings {
    /// Loads and validates a settings file.
    pub fn load(path: &Path) -> ControlResult<Self> {
        let settings = Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(ControlError::Config)?;
        let settings: Settings = settings.try_deserialize().map_err(ControlError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> ControlResult<()> {
        for (id, instrument) in &self.instruments {
            if instrument.queue.is_empty() {
                return Err(ControlError::Configuration(format!(
                    "Instrument '{id}' has an empty queue name"
                )));
            }
            if instrument.serial.baud_rate == 0 {
                return Err(ControlError::Configuration(format!(
                    "Instrument '{id}' has baud rate 0"
                )));
            }
        }

        if let Some(magnet) = &self.magnet {
            for role in [&magnet.power_supply, &magnet.temperature_monitor] {
                if !self.instruments.contains_key(role) {
                    return Err(ControlError::Configuration(format!(
                        "Magnet section references unknown instrument '{role}'"
                    )));
                }
            }
            if magnet.safe_temperatures.is_empty() {
                return Err(ControlError::Configuration(
                    "Magnet section needs at least one safe-temperature point".to_string(),
                ));
            }
            if magnet.field_tolerance <= 0.0 {
                return Err(ControlError::Configuration(
                    "Magnet field tolerance must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn instrument(&self, id: &str) -> ControlResult<&InstrumentSettings> {
        self.instruments.get(id).ok_or_else(|| {
            ControlError::Configuration(format!("No instrument '{id}' in configuration"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[instruments.cryostat_monitor]
kind = "ls218"
queue = "LS218.driver"

[instruments.cryostat_monitor.serial]
address = "/dev/ttyUSB0"
baud_rate = 9600
data_bits = 7
parity = "odd"

[instruments.magnet_psu]
kind = "sms"
queue = "SMS.driver"
command_delay = "100ms"
reply_timeout = "2s"

[instruments.magnet_psu.serial]
address = "/dev/ttyUSB1"
baud_rate = 9600

[magnet]
power_supply = "magnet_psu"
temperature_monitor = "cryostat_monitor"
temperature_channel = "5"
safe_temperatures = [[0.0, 6.5], [2.0, 5.5], [5.0, 4.5]]
target_field = 2.0
switch_warm_time = "20s"
"#;

    fn write_sample(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn sample_file_loads_and_validates() {
        let file = write_sample(SAMPLE);
        let settings = Settings::load(file.path()).unwrap();

        let monitor = settings.instrument("cryostat_monitor").unwrap();
        assert_eq!(monitor.kind, InstrumentKind::Ls218);
        assert_eq!(monitor.serial.data_bits, 7);
        assert_eq!(monitor.queue, "LS218.driver");

        let psu = settings.instrument("magnet_psu").unwrap();
        let exec = psu.executor_config();
        assert_eq!(exec.command_delay, Duration::from_millis(100));
        assert_eq!(exec.reply_timeout, Duration::from_secs(2));
        assert!(exec.status_filter.is_some());

        let magnet = settings.magnet.unwrap();
        assert_eq!(magnet.target_field, 2.0);
        assert_eq!(magnet.switch_warm_time, Duration::from_secs(20));
        // Defaults fill the unspecified knobs.
        assert_eq!(magnet.poll_interval, Duration::from_secs(1));
        assert_eq!(magnet.field_tolerance, 0.01);
    }

    #[test]
    fn family_defaults_apply_without_overrides() {
        let file = write_sample(SAMPLE);
        let settings = Settings::load(file.path()).unwrap();
        let monitor = settings.instrument("cryostat_monitor").unwrap();
        let exec = monitor.executor_config();
        assert_eq!(exec.command_delay, Duration::from_millis(50));
        assert!(exec.status_filter.is_none());
    }

    #[test]
    fn magnet_section_must_reference_known_instruments() {
        let broken = SAMPLE.replace("power_supply = \"magnet_psu\"", "power_supply = \"nope\"");
        let file = write_sample(&broken);
        let err = Settings::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("unknown instrument 'nope'"));
    }

    #[test]
    fn unknown_instrument_lookup_is_an_error() {
        let file = write_sample(SAMPLE);
        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.instrument("missing").is_err());
    }
}
