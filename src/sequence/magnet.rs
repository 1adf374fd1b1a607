//! Persistent-mode magnet ramp controller.
//!
//! Sequences an SMS power supply and a Lakeshore 218 magnet-temperature
//! monitor through a ramp: program the setpoint, warm the persistent-mode
//! switch heater, ramp to field, secure. The controller never touches a
//! transport — it talks to each instrument's driver task through
//! [`DriverHandle`] envelope round trips, so physical I/O serialization and
//! procedural sequencing stay in separate tasks.
//!
//! State set: `Initialize → Idle ⇄ RampInit → WaitPersistentMode → Ramping
//! → RampDone → Idle`, with `Quenched` as the fault holding state.
//! `Initialize` is the unique start state; there is no terminal state —
//! `Idle` is the steady-state rest point of a long-running control loop.

use std::time::Instant;

use tracing::{error, info, warn};

use crate::command::CommandDescriptor;
use crate::config::MagnetSettings;
use crate::driver::DriverHandle;
use crate::error::{ControlError, ControlResult};
use crate::instruments::{LS218_COMMANDS, SMS_COMMANDS};
use crate::protocol::CommandResult;
use crate::sequence::{BoxedState, SignalSlot, State, StateMachine};

/// Externally raisable controller signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampSignal {
    /// Begin a ramp to the configured target field.
    StartRamp,
    /// Stop what is in progress and secure the magnet; in `Quenched`,
    /// acknowledge the fault.
    Abort,
}

/// The closed state set of the magnet controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagnetStateKind {
    Initialize,
    Idle,
    RampInit,
    WaitPersistentMode,
    Ramping,
    RampDone,
    Quenched,
}

/// One timestamped instrument reading, as consumed from a reply envelope.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub value: f64,
    pub t0: f64,
    pub t1: f64,
}

impl Measurement {
    fn from_envelope(value: f64, envelope: &CommandResult) -> Self {
        Self {
            value,
            t0: envelope.t0,
            t1: envelope.t1,
        }
    }
}

/// Piecewise-linear maximum-safe-temperature curve over field.
///
/// Clamped at both ends: outside the configured field range the nearest
/// end point applies, which keeps the poll loop alive on overshoot and is
/// the conservative reading of the table.
#[derive(Debug, Clone)]
pub struct SafetyCurve {
    points: Vec<(f64, f64)>,
}

impl SafetyCurve {
    pub fn new(points: &[[f64; 2]]) -> ControlResult<Self> {
        if points.is_empty() {
            return Err(ControlError::Configuration(
                "Safety curve needs at least one point".to_string(),
            ));
        }
        let mut points: Vec<(f64, f64)> = points.iter().map(|p| (p[0], p[1])).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { points })
    }

    /// Maximum safe magnet temperature at a field value.
    pub fn max_temperature(&self, field: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if field <= first.0 {
            return first.1;
        }
        if field >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if field <= x1 {
                let t = (field - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }
}

fn descriptor(table: &'static [CommandDescriptor], name: &str) -> CommandDescriptor {
    // Tables are static and checked at registry construction; a miss here
    // is a programming error in this module.
    *table
        .iter()
        .find(|d| d.name == name)
        .unwrap_or_else(|| panic!("missing descriptor '{name}'"))
}

/// Shared context of the magnet state machine.
pub struct MagnetContext {
    power_supply: DriverHandle,
    temperatures: DriverHandle,
    pub settings: MagnetSettings,
    pub curve: SafetyCurve,
    pub magnet_temperature: Option<Measurement>,
    pub field: Option<Measurement>,
}

impl MagnetContext {
    pub fn new(
        power_supply: DriverHandle,
        temperatures: DriverHandle,
        settings: MagnetSettings,
    ) -> ControlResult<Self> {
        let curve = SafetyCurve::new(&settings.safe_temperatures)?;
        Ok(Self {
            power_supply,
            temperatures,
            settings,
            curve,
            magnet_temperature: None,
            field: None,
        })
    }

    /// Polls the magnet temperature channel. A failed read is logged and
    /// leaves the previous measurement in place — the loop keeps polling.
    pub async fn poll_magnet_temperature(&mut self) -> bool {
        let line = descriptor(LS218_COMMANDS, "KRDG?")
            .instruction(&[self.settings.temperature_channel.clone()]);
        match self.temperatures.query_line(&line).await {
            Ok(envelope) if !envelope.is_err() => match envelope.as_f64() {
                Some(value) => {
                    self.magnet_temperature = Some(Measurement::from_envelope(value, &envelope));
                    true
                }
                None => {
                    warn!(result = ?envelope.result, "Temperature reading was not a number");
                    false
                }
            },
            Ok(envelope) => {
                warn!(error = %envelope.error, "Temperature read rejected");
                false
            }
            Err(error) => {
                warn!(%error, "Temperature read failed");
                false
            }
        }
    }

    /// Polls the supply output field (tesla).
    pub async fn poll_field(&mut self) -> bool {
        let line = descriptor(SMS_COMMANDS, "OUTPUT").instruction(&["T".to_string()]);
        match self.power_supply.query_line(&line).await {
            Ok(envelope) if !envelope.is_err() => {
                let value = envelope
                    .result
                    .get("value")
                    .and_then(|v| v.as_f64())
                    .or_else(|| envelope.as_f64());
                match value {
                    Some(value) => {
                        self.field = Some(Measurement::from_envelope(value, &envelope));
                        true
                    }
                    None => {
                        warn!(result = ?envelope.result, "Field reading was not a number");
                        false
                    }
                }
            }
            Ok(envelope) => {
                warn!(error = %envelope.error, "Field read rejected");
                false
            }
            Err(error) => {
                warn!(%error, "Field read failed");
                false
            }
        }
    }

    /// Whether the magnet temperature is below the safety curve for the
    /// present field. `None` until both measurements exist.
    pub fn temperature_is_safe(&self) -> Option<bool> {
        let temperature = self.magnet_temperature?;
        let field = self.field?;
        Some(temperature.value <= self.curve.max_temperature(field.value))
    }

    pub fn at_target(&self) -> bool {
        self.field
            .map(|f| (f.value - self.settings.target_field).abs() <= self.settings.field_tolerance)
            .unwrap_or(false)
    }

    async fn write_supply(&self, descriptor_name: &str, pars: &[&str]) -> bool {
        let pars: Vec<String> = pars.iter().map(|s| s.to_string()).collect();
        let line = descriptor(SMS_COMMANDS, descriptor_name).instruction(&pars);
        match self.power_supply.write_line(&line).await {
            Ok(envelope) if !envelope.is_err() => true,
            Ok(envelope) => {
                warn!(error = %envelope.error, line = %line, "Supply write rejected");
                false
            }
            Err(error) => {
                warn!(%error, line = %line, "Supply write failed");
                false
            }
        }
    }

    /// Programs the ramp: tesla units, mid setpoint, switch heater on.
    pub async fn program_ramp(&mut self) -> bool {
        let target = format!("{}", self.settings.target_field);
        self.write_supply("TESLA", &["ON"]).await
            && self.write_supply("SET", &["MID", &target]).await
            && self.write_supply("HEATER", &["ON"]).await
    }

    /// Starts ramping toward the programmed mid setpoint.
    pub async fn start_ramp(&mut self) -> bool {
        self.write_supply("PAUSE", &["OFF"]).await && self.write_supply("RAMP", &["MID"]).await
    }

    /// Pauses the supply and drops the switch heater.
    pub async fn secure(&mut self) -> bool {
        let paused = self.write_supply("PAUSE", &["ON"]).await;
        let heater_off = self.write_supply("HEATER", &["OFF"]).await;
        paused && heater_off
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Waits for a first successful reading from every instrument.
struct Initialize {
    done: bool,
}

#[async_trait::async_trait]
impl State for Initialize {
    type Context = MagnetContext;
    type Signal = RampSignal;
    type Kind = MagnetStateKind;

    fn kind(&self) -> MagnetStateKind {
        MagnetStateKind::Initialize
    }

    async fn run(&mut self, ctx: &mut MagnetContext) -> bool {
        ctx.poll_magnet_temperature().await;
        ctx.poll_field().await;
        self.done = ctx.magnet_temperature.is_some() && ctx.field.is_some();
        self.done
    }

    // Signals are not meaningful before both instruments answer; leave
    // them pending for Idle.
    fn next(&self, _signal: Option<&RampSignal>) -> (MagnetStateKind, bool) {
        if self.done {
            (MagnetStateKind::Idle, false)
        } else {
            (MagnetStateKind::Initialize, false)
        }
    }
}

/// Steady-state rest point: keep an eye on the magnet temperature.
struct Idle;

#[async_trait::async_trait]
impl State for Idle {
    type Context = MagnetContext;
    type Signal = RampSignal;
    type Kind = MagnetStateKind;

    fn kind(&self) -> MagnetStateKind {
        MagnetStateKind::Idle
    }

    async fn run(&mut self, ctx: &mut MagnetContext) -> bool {
        ctx.poll_magnet_temperature().await;
        false
    }

    fn next(&self, signal: Option<&RampSignal>) -> (MagnetStateKind, bool) {
        match signal {
            Some(RampSignal::StartRamp) => (MagnetStateKind::RampInit, true),
            _ => (MagnetStateKind::Idle, false),
        }
    }
}

/// Programs the supply for the ramp.
struct RampInit {
    done: bool,
}

#[async_trait::async_trait]
impl State for RampInit {
    type Context = MagnetContext;
    type Signal = RampSignal;
    type Kind = MagnetStateKind;

    fn kind(&self) -> MagnetStateKind {
        MagnetStateKind::RampInit
    }

    async fn run(&mut self, ctx: &mut MagnetContext) -> bool {
        if !self.done {
            self.done = ctx.program_ramp().await;
            if self.done {
                info!(target_field = ctx.settings.target_field, "Ramp programmed");
            }
        }
        self.done
    }

    fn next(&self, signal: Option<&RampSignal>) -> (MagnetStateKind, bool) {
        match signal {
            Some(RampSignal::Abort) => (MagnetStateKind::RampDone, true),
            _ if self.done => (MagnetStateKind::WaitPersistentMode, false),
            _ => (MagnetStateKind::RampInit, false),
        }
    }
}

/// Time-guarded wait for the persistent-mode switch to go normal: the
/// switch heater must have been hot for the configured warm-up time.
struct WaitPersistentMode {
    entered_at: Instant,
    done: bool,
}

#[async_trait::async_trait]
impl State for WaitPersistentMode {
    type Context = MagnetContext;
    type Signal = RampSignal;
    type Kind = MagnetStateKind;

    fn kind(&self) -> MagnetStateKind {
        MagnetStateKind::WaitPersistentMode
    }

    async fn run(&mut self, ctx: &mut MagnetContext) -> bool {
        ctx.poll_magnet_temperature().await;
        self.done = self.entered_at.elapsed() >= ctx.settings.switch_warm_time;
        self.done
    }

    fn next(&self, signal: Option<&RampSignal>) -> (MagnetStateKind, bool) {
        match signal {
            Some(RampSignal::Abort) => (MagnetStateKind::RampDone, true),
            _ if self.done => (MagnetStateKind::Ramping, false),
            _ => (MagnetStateKind::WaitPersistentMode, false),
        }
    }
}

/// Drives the field to the target while watching the safety curve.
struct Ramping {
    done: bool,
    quenched: bool,
}

#[async_trait::async_trait]
impl State for Ramping {
    type Context = MagnetContext;
    type Signal = RampSignal;
    type Kind = MagnetStateKind;

    fn kind(&self) -> MagnetStateKind {
        MagnetStateKind::Ramping
    }

    async fn enter(&mut self, ctx: &mut MagnetContext) {
        if !ctx.start_ramp().await {
            warn!("Ramp start command failed; will keep polling");
        }
    }

    async fn run(&mut self, ctx: &mut MagnetContext) -> bool {
        ctx.poll_field().await;
        ctx.poll_magnet_temperature().await;

        if ctx.temperature_is_safe() == Some(false) {
            let temperature = ctx.magnet_temperature.map(|m| m.value);
            let field = ctx.field.map(|m| m.value);
            error!(?temperature, ?field, "Magnet temperature above safety curve");
            self.quenched = true;
            return true;
        }

        self.done = ctx.at_target();
        self.done
    }

    fn next(&self, signal: Option<&RampSignal>) -> (MagnetStateKind, bool) {
        if self.quenched {
            return (MagnetStateKind::Quenched, false);
        }
        match signal {
            Some(RampSignal::Abort) => (MagnetStateKind::RampDone, true),
            _ if self.done => (MagnetStateKind::RampDone, false),
            _ => (MagnetStateKind::Ramping, false),
        }
    }
}

/// Secures the supply after a ramp and lets the switch cool.
struct RampDone {
    entered_at: Instant,
    done: bool,
}

#[async_trait::async_trait]
impl State for RampDone {
    type Context = MagnetContext;
    type Signal = RampSignal;
    type Kind = MagnetStateKind;

    fn kind(&self) -> MagnetStateKind {
        MagnetStateKind::RampDone
    }

    async fn enter(&mut self, ctx: &mut MagnetContext) {
        if ctx.secure().await {
            info!(field = ?ctx.field.map(|m| m.value), "Magnet secured");
        }
    }

    async fn run(&mut self, ctx: &mut MagnetContext) -> bool {
        ctx.poll_magnet_temperature().await;
        self.done = self.entered_at.elapsed() >= ctx.settings.switch_cool_time;
        self.done
    }

    fn next(&self, _signal: Option<&RampSignal>) -> (MagnetStateKind, bool) {
        if self.done {
            (MagnetStateKind::Idle, false)
        } else {
            (MagnetStateKind::RampDone, false)
        }
    }
}

/// Fault holding state. Entered when the magnet temperature crosses the
/// safety curve during a ramp; holds until the fault is acknowledged.
struct Quenched;

#[async_trait::async_trait]
impl State for Quenched {
    type Context = MagnetContext;
    type Signal = RampSignal;
    type Kind = MagnetStateKind;

    fn kind(&self) -> MagnetStateKind {
        MagnetStateKind::Quenched
    }

    async fn enter(&mut self, ctx: &mut MagnetContext) {
        error!("Quench condition: pausing supply and dropping switch heater");
        ctx.secure().await;
    }

    async fn run(&mut self, ctx: &mut MagnetContext) -> bool {
        ctx.poll_magnet_temperature().await;
        false
    }

    fn next(&self, signal: Option<&RampSignal>) -> (MagnetStateKind, bool) {
        match signal {
            Some(RampSignal::Abort) => (MagnetStateKind::Idle, true),
            _ => (MagnetStateKind::Quenched, false),
        }
    }
}

fn magnet_state(kind: MagnetStateKind) -> BoxedState<MagnetContext, RampSignal, MagnetStateKind> {
    match kind {
        MagnetStateKind::Initialize => Box::new(Initialize { done: false }),
        MagnetStateKind::Idle => Box::new(Idle),
        MagnetStateKind::RampInit => Box::new(RampInit { done: false }),
        MagnetStateKind::WaitPersistentMode => Box::new(WaitPersistentMode {
            entered_at: Instant::now(),
            done: false,
        }),
        MagnetStateKind::Ramping => Box::new(Ramping {
            done: false,
            quenched: false,
        }),
        MagnetStateKind::RampDone => Box::new(RampDone {
            entered_at: Instant::now(),
            done: false,
        }),
        MagnetStateKind::Quenched => Box::new(Quenched),
    }
}

/// The magnet-ramp control loop.
pub struct MagnetController {
    machine: StateMachine<MagnetContext, RampSignal, MagnetStateKind>,
}

impl MagnetController {
    pub fn new(
        power_supply: DriverHandle,
        temperatures: DriverHandle,
        settings: MagnetSettings,
    ) -> ControlResult<Self> {
        let ctx = MagnetContext::new(power_supply, temperatures, settings)?;
        Ok(Self {
            machine: StateMachine::new(ctx, MagnetStateKind::Initialize, magnet_state),
        })
    }

    /// Handle for raising [`RampSignal`]s from other tasks.
    pub fn signals(&self) -> SignalSlot<RampSignal> {
        self.machine.signals()
    }

    pub fn current_state(&self) -> MagnetStateKind {
        self.machine.current_kind()
    }

    pub fn context(&self) -> &MagnetContext {
        self.machine.context()
    }

    pub async fn tick(&mut self) {
        self.machine.tick().await;
    }

    /// Runs the control loop forever at the configured poll interval.
    pub async fn run(mut self) {
        let interval = self.machine.context().settings.poll_interval;
        info!(?interval, "Magnet controller started");
        self.machine.run(interval).await;
    }
}
