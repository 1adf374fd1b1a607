//! Simulated instruments.
//!
//! In-process [`Transport`] implementations that answer like the real
//! hardware, for tests and for running the binary without a cryostat
//! attached. The SMS simulator models enough supply behavior for the magnet
//! controller to sequence against: a ramping output, the persistent-switch
//! heater, pause, and (optionally) the unsolicited status broadcasts the
//! real supply interleaves with replies.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use crate::error::{ControlError, ControlResult};
use crate::transport::Transport;

fn stamp() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

/// Simulated Lakeshore 218 temperature monitor.
pub struct SimLs218 {
    base_temperature: f64,
    jitter: f64,
}

impl SimLs218 {
    pub fn new(base_temperature: f64) -> Self {
        Self {
            base_temperature,
            jitter: 0.005,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    fn reading(&self) -> f64 {
        let noise = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        self.base_temperature + noise
    }

    fn respond(&self, line: &str) -> ControlResult<String> {
        let line = line.trim();
        if line == "*IDN?" {
            return Ok("LSCI,MODEL218S,SIM0218,1.0".to_string());
        }
        if let Some(channel) = line
            .strip_prefix("KRDG? ")
            .or_else(|| line.strip_prefix("SRDG? "))
            .or_else(|| line.strip_prefix("CRDG? "))
        {
            if channel.trim() == "0" {
                let readings: Vec<String> = (0..8)
                    .map(|_| format!("{:+.3}", self.reading()))
                    .collect();
                return Ok(readings.join(","));
            }
            return Ok(format!("{:+.3}", self.reading()));
        }
        if line == "BAUD?" {
            return Ok("2".to_string());
        }
        Ok("0".to_string())
    }
}

#[async_trait]
impl Transport for SimLs218 {
    async fn write(&mut self, line: &str) -> ControlResult<usize> {
        Ok(line.len())
    }

    async fn query(&mut self, line: &str) -> ControlResult<String> {
        self.respond(line)
    }

    async fn read(&mut self) -> ControlResult<String> {
        Err(ControlError::Transport("Nothing to read".into()))
    }
}

/// Simulated SMS magnet power supply.
///
/// Time is command-driven: the output moves one `ramp_step` toward the ramp
/// target on every query, which keeps tests deterministic.
pub struct SimSms {
    output: f64,
    mid: f64,
    max: f64,
    ramp_step: f64,
    heater_on: bool,
    paused: bool,
    ramp_target: Option<f64>,
    /// Emit a `RAMP STATUS` broadcast before each reply while ramping.
    noisy: bool,
    pending_reply: Option<String>,
}

impl SimSms {
    pub fn new() -> Self {
        Self {
            output: 0.0,
            mid: 0.0,
            max: 5.0,
            ramp_step: 0.5,
            heater_on: false,
            paused: false,
            ramp_target: None,
            noisy: false,
            pending_reply: None,
        }
    }

    /// Output change per query while ramping, in tesla.
    pub fn with_ramp_step(mut self, step: f64) -> Self {
        self.ramp_step = step;
        self
    }

    /// Interleave unsolicited status broadcasts with replies while ramping.
    pub fn with_status_noise(mut self) -> Self {
        self.noisy = true;
        self
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn heater_on(&self) -> bool {
        self.heater_on
    }

    fn step(&mut self) {
        let Some(target) = self.ramp_target else {
            return;
        };
        if self.paused {
            return;
        }
        let delta = target - self.output;
        if delta.abs() <= self.ramp_step {
            self.output = target;
            self.ramp_target = None;
        } else {
            self.output += self.ramp_step * delta.signum();
        }
    }

    fn apply_write(&mut self, line: &str) -> ControlResult<()> {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("SET MID ") {
            self.mid = value
                .trim()
                .parse()
                .map_err(|_| ControlError::Transport(format!("Bad SET MID value '{value}'")))?;
        } else if let Some(value) = line.strip_prefix("SET MAX ") {
            self.max = value
                .trim()
                .parse()
                .map_err(|_| ControlError::Transport(format!("Bad SET MAX value '{value}'")))?;
        } else if line == "RAMP MID" {
            self.ramp_target = Some(self.mid);
        } else if line == "RAMP MAX" {
            self.ramp_target = Some(self.max);
        } else if line == "RAMP ZERO" {
            self.ramp_target = Some(0.0);
        } else if line == "HEATER ON" {
            self.heater_on = true;
        } else if line == "HEATER OFF" {
            self.heater_on = false;
        } else if line == "PAUSE ON" {
            self.paused = true;
        } else if line == "PAUSE OFF" {
            self.paused = false;
        }
        // TESLA/DIRECTION and anything else are accepted silently.
        Ok(())
    }

    fn respond(&mut self, line: &str) -> String {
        let line = line.trim();
        if line == "GET MID" {
            format!("{} MID SETTING: {:.4} TESLA", stamp(), self.mid)
        } else if line == "GET MAX" {
            format!("{} MAX SETTING: {:.4} TESLA", stamp(), self.max)
        } else if line == "GET OUTPUT" {
            format!(
                "{} OUTPUT: {:.4} TESLA AT {:.1} VOLTS",
                stamp(),
                self.output,
                if self.ramp_target.is_some() { 2.5 } else { 0.1 }
            )
        } else if line == "GET PER" {
            format!("{} PER: {:.4}", stamp(), self.output)
        } else {
            format!("{} {}", stamp(), line)
        }
    }
}

impl Default for SimSms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimSms {
    async fn write(&mut self, line: &str) -> ControlResult<usize> {
        self.apply_write(line)?;
        Ok(line.len())
    }

    async fn query(&mut self, line: &str) -> ControlResult<String> {
        self.step();
        let reply = self.respond(line);
        if self.noisy && self.ramp_target.is_some() {
            self.pending_reply = Some(reply);
            return Ok(format!(
                "{} RAMP STATUS: RAMPING AT {:.4} TESLA",
                stamp(),
                self.output
            ));
        }
        Ok(reply)
    }

    async fn read(&mut self) -> ControlResult<String> {
        self.pending_reply
            .take()
            .ok_or_else(|| ControlError::Transport("Nothing to read".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ls218_returns_noisy_readings_per_channel() {
        let mut sim = SimLs218::new(4.2).with_jitter(0.0);
        assert_eq!(sim.query("KRDG? 5").await.unwrap(), "+4.200");
        let all = sim.query("KRDG? 0").await.unwrap();
        assert_eq!(all.split(',').count(), 8);
    }

    #[tokio::test]
    async fn sms_ramps_toward_mid_setpoint() {
        let mut sim = SimSms::new().with_ramp_step(1.0);
        sim.write("SET MID 2.0").await.unwrap();
        sim.write("HEATER ON").await.unwrap();
        sim.write("RAMP MID").await.unwrap();

        let first = sim.query("GET OUTPUT").await.unwrap();
        assert!(first.contains("OUTPUT: 1.0000"));
        let second = sim.query("GET OUTPUT").await.unwrap();
        assert!(second.contains("OUTPUT: 2.0000"));
        // Target reached; the output holds.
        let third = sim.query("GET OUTPUT").await.unwrap();
        assert!(third.contains("OUTPUT: 2.0000"));
    }

    #[tokio::test]
    async fn pause_freezes_the_ramp() {
        let mut sim = SimSms::new().with_ramp_step(1.0);
        sim.write("SET MID 3.0").await.unwrap();
        sim.write("RAMP MID").await.unwrap();
        sim.query("GET OUTPUT").await.unwrap();
        sim.write("PAUSE ON").await.unwrap();
        let frozen = sim.query("GET OUTPUT").await.unwrap();
        assert!(frozen.contains("OUTPUT: 1.0000"));
    }

    #[tokio::test]
    async fn noisy_mode_interleaves_status_broadcasts() {
        let mut sim = SimSms::new().with_ramp_step(0.5).with_status_noise();
        sim.write("SET MID 2.0").await.unwrap();
        sim.write("RAMP MID").await.unwrap();

        let broadcast = sim.query("GET OUTPUT").await.unwrap();
        assert!(broadcast.contains("RAMP STATUS"));
        let genuine = sim.read().await.unwrap();
        assert!(genuine.contains("OUTPUT: 0.5000"));
    }
}
