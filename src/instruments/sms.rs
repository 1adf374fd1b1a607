//! SMS-series superconducting magnet power supply.
//!
//! The supply speaks a multi-word vocabulary (`GET MID`, `SET MID 2.0`,
//! `RAMP MID`) rather than SCPI tokens, and prefixes every line it emits
//! with a wall-clock timestamp (`HH:MM:SS ...`). Canonical command names
//! here are single tokens so instruction lines survive the splitter; the
//! multi-word wire forms are carried as aliases, and the `SET` family builds
//! its subcommand from the first argument.
//!
//! The supply also broadcasts unsolicited status lines while ramping or
//! switching the persistent-mode heater. [`is_status_update`] classifies
//! them so the executor can discard-and-retry (see
//! [`crate::command::executor`]).

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::command::descriptor::{validate_choice, CommandDescriptor};

/// First signed decimal number in a reply payload.
static FLOAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?").expect("static regex"));

/// Leading `HH:MM:SS ` stamp on every supply line.
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}:\d{2}:\d{2}\s*").expect("static regex"));

/// Markers of autonomous status broadcasts, as opposed to command replies.
static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(RAMP STATUS|HEATER STATUS|QUENCH|EXTERNAL TRIP|^\s*!)").expect("static regex")
});

/// Strips the wall-clock prefix the supply puts on every line.
pub fn strip_timestamp(line: &str) -> &str {
    match TIMESTAMP_RE.find(line.trim_start()) {
        Some(found) => &line.trim_start()[found.end()..],
        None => line.trim_start(),
    }
}

/// Classifies a raw line as an unsolicited status broadcast.
pub fn is_status_update(line: &str) -> bool {
    STATUS_RE.is_match(strip_timestamp(line))
}

fn validate_units(units: &str) -> Result<()> {
    if units != "T" && units != "A" {
        bail!("Units must be either T or A, instead got {}", units);
    }
    Ok(())
}

fn validate_units_arg(pars: &[String]) -> Result<()> {
    validate_units(&pars[0])
}

fn validate_set(pars: &[String]) -> Result<()> {
    validate_choice(&pars[0], &["MID", "MAX", "RAMP", "LIMIT"])?;
    pars[1]
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow::anyhow!("Set value must be a number, instead got {}", pars[1]))?;
    Ok(())
}

fn validate_ramp_target(pars: &[String]) -> Result<()> {
    validate_choice(&pars[0], &["MID", "MAX", "ZERO"])
}

fn validate_on_off(pars: &[String]) -> Result<()> {
    validate_choice(&pars[0], &["ON", "OFF", "1", "0"])
}

fn validate_direction(pars: &[String]) -> Result<()> {
    validate_choice(&pars[0], &["+", "-", "0"])
}

/// Extracts the first number from a timestamped payload.
fn parse_tagged_float(raw: &str) -> Result<f64> {
    let payload = strip_timestamp(raw);
    let found = FLOAT_RE
        .find(payload)
        .ok_or_else(|| anyhow::anyhow!("No numeric field in '{}'", payload.trim()))?;
    Ok(found.as_str().parse()?)
}

fn parse_setting(_pars: &[String], raw: &str) -> Result<Value> {
    Ok(Value::from(parse_tagged_float(raw)?))
}

/// `GET OUTPUT` replies carry the output value and the supply voltage,
/// e.g. `12:01:05 OUTPUT: 1.2500 TESLA AT 2.3 VOLTS`.
fn parse_output(_pars: &[String], raw: &str) -> Result<Value> {
    let payload = strip_timestamp(raw);
    let mut numbers = FLOAT_RE.find_iter(payload);
    let value: f64 = numbers
        .next()
        .ok_or_else(|| anyhow::anyhow!("No numeric field in '{}'", payload.trim()))?
        .as_str()
        .parse()?;
    match numbers.next() {
        Some(volts) => Ok(json!({
            "value": value,
            "volts": volts.as_str().parse::<f64>()?,
        })),
        None => Ok(Value::from(value)),
    }
}

/// SMS command table. Replies pass through unparsed unless noted; the
/// supply's free-form lines are kept intact for the caller where no numeric
/// decode is declared.
pub static SMS_COMMANDS: &[CommandDescriptor] = &[
    CommandDescriptor::query("MID")
        .with_args("{}")
        .with_alias("GET MID", "")
        .with_validator(validate_units_arg)
        .with_parser(parse_setting),
    CommandDescriptor::query("MAX")
        .with_args("{}")
        .with_alias("GET MAX", "")
        .with_validator(validate_units_arg)
        .with_parser(parse_setting),
    CommandDescriptor::query("OUTPUT")
        .with_args("{}")
        .with_alias("GET OUTPUT", "")
        .with_validator(validate_units_arg)
        .with_parser(parse_output),
    CommandDescriptor::query("PER").with_alias("GET PER", "").with_parser(parse_setting),
    // Generic passthroughs from the original vocabulary.
    CommandDescriptor::query("UPDATE").with_args("{}"),
    CommandDescriptor::query("GET").with_args("{}"),
    CommandDescriptor::write("SET")
        .with_args("{} {}")
        .with_validator(validate_set),
    CommandDescriptor::write("RAMP")
        .with_args("{}")
        .with_validator(validate_ramp_target),
    CommandDescriptor::write("TESLA")
        .with_args("{}")
        .with_validator(validate_on_off),
    CommandDescriptor::write("HEATER")
        .with_args("{}")
        .with_validator(validate_on_off),
    CommandDescriptor::write("PAUSE")
        .with_args("{}")
        .with_validator(validate_on_off),
    CommandDescriptor::write("DIRECTION")
        .with_args("{}")
        .with_validator(validate_direction),
];
