//! Lakeshore 218 temperature monitor.
//!
//! Eight-input monitor; the vocabulary here is read-only apart from the
//! IEEE-488.2 common commands merged in by [`super::registry_for`]. Input 0
//! addresses all eight channels at once, in which case the reading commands
//! return a list instead of a scalar.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::command::descriptor::{parse_i64, split_fields, CommandDescriptor};

/// Input channel argument: 1–8, or 0 for "all inputs" where allowed.
fn validate_input_number(input: &str, include_all: bool) -> Result<()> {
    let min = if include_all { 0 } else { 1 };
    match input.trim().parse::<i64>() {
        Ok(n) if (min..=8).contains(&n) => Ok(()),
        _ => bail!(
            "Input must be an integer between {} and 8, instead got {}",
            min,
            input
        ),
    }
}

fn validate_input(pars: &[String]) -> Result<()> {
    validate_input_number(&pars[0], false)
}

fn validate_input_or_all(pars: &[String]) -> Result<()> {
    validate_input_number(&pars[0], true)
}

fn validate_output(pars: &[String]) -> Result<()> {
    match pars[0].trim().parse::<i64>() {
        Ok(1) | Ok(2) => Ok(()),
        _ => bail!("Input must be 1 or 2, instead got {}", pars[0]),
    }
}

/// Reading commands return every channel when queried with input 0.
fn parse_reading(pars: &[String], raw: &str) -> Result<Value> {
    if pars[0].trim() == "0" {
        let values = split_fields(raw)
            .iter()
            .map(|field| field.parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        Ok(Value::from(values))
    } else {
        Ok(Value::from(raw.trim().parse::<f64>()?))
    }
}

fn parse_alarm_parameters(_pars: &[String], raw: &str) -> Result<Value> {
    let fields = split_fields(raw);
    if fields.len() < 6 {
        bail!("Expected 6 fields, got {}", fields.len());
    }
    Ok(json!({
        "on/off": fields[0].parse::<i64>()?,
        "source": fields[1].parse::<i64>()?,
        "high": fields[2].parse::<f64>()?,
        "low": fields[3].parse::<f64>()?,
        "deadband": fields[4].parse::<f64>()?,
        "latch": fields[5].parse::<i64>()?,
    }))
}

fn parse_alarm_status(_pars: &[String], raw: &str) -> Result<Value> {
    let fields = split_fields(raw);
    if fields.len() < 2 {
        bail!("Expected 2 fields, got {}", fields.len());
    }
    Ok(json!({
        "high": fields[0].parse::<i64>()?,
        "low": fields[1].parse::<i64>()?,
    }))
}

fn parse_analog_parameters(_pars: &[String], raw: &str) -> Result<Value> {
    let fields = split_fields(raw);
    if fields.len() < 7 {
        bail!("Expected 7 fields, got {}", fields.len());
    }
    Ok(json!({
        "bipolar": fields[0].parse::<i64>()?,
        "mode": fields[1].parse::<i64>()?,
        "input": fields[2].parse::<i64>()?,
        "source": fields[3].parse::<i64>()?,
        "high": fields[4].parse::<f64>()?,
        "low": fields[5].parse::<f64>()?,
        "manual": fields[6].parse::<f64>()?,
    }))
}

fn parse_f64_scalar(_pars: &[String], raw: &str) -> Result<Value> {
    Ok(Value::from(raw.trim().parse::<f64>()?))
}

/// LS218 command table.
pub static LS218_COMMANDS: &[CommandDescriptor] = &[
    CommandDescriptor::query("SRDG?")
        .with_args("{}")
        .with_validator(validate_input_or_all)
        .with_parser(parse_reading),
    CommandDescriptor::query("KRDG?")
        .with_args("{}")
        .with_validator(validate_input_or_all)
        .with_parser(parse_reading),
    CommandDescriptor::query("CRDG?")
        .with_args("{}")
        .with_validator(validate_input_or_all)
        .with_parser(parse_reading),
    CommandDescriptor::query("ALARM?")
        .with_args("{}")
        .with_validator(validate_input)
        .with_parser(parse_alarm_parameters),
    CommandDescriptor::query("ALARMST?")
        .with_args("{}")
        .with_validator(validate_input)
        .with_parser(parse_alarm_status),
    CommandDescriptor::query("ANALOG?")
        .with_args("{}")
        .with_validator(validate_output)
        .with_parser(parse_analog_parameters),
    CommandDescriptor::query("AOUT?")
        .with_args("{}")
        .with_validator(validate_output)
        .with_parser(parse_f64_scalar),
    // Decoded as the raw baud selector, not a lookup table.
    CommandDescriptor::query("BAUD?").with_parser(parse_i64),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::registry::CommandRegistry;
    use crate::instruments::registry_for;
    use crate::instruments::InstrumentKind;

    fn args(pars: &[&str]) -> Vec<String> {
        pars.iter().map(|s| s.to_string()).collect()
    }

    fn lookup(name: &str) -> CommandDescriptor {
        *LS218_COMMANDS.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn table_composes_with_common_commands() {
        let registry = registry_for(InstrumentKind::Ls218).unwrap();
        assert!(registry.is_query("KRDG?"));
        assert!(registry.is_query("*IDN?"));
        assert!(registry.is_write("*RST"));
    }

    #[test]
    fn table_builds_standalone_registry() {
        let registry = CommandRegistry::from_tables(&[LS218_COMMANDS]).unwrap();
        assert_eq!(registry.len(), LS218_COMMANDS.len());
    }

    #[test]
    fn channel_zero_reads_all_inputs_as_a_list() {
        let krdg = lookup("KRDG?");
        let parsed = (krdg.parse.unwrap())(
            &args(&["0"]),
            "+4.215,+77.36,+293.1,+0.0,+1.2,+2.4,+3.6,+4.8",
        )
        .unwrap();
        let list = parsed.as_array().unwrap();
        assert_eq!(list.len(), 8);
        assert_eq!(list[1].as_f64(), Some(77.36));
    }

    #[test]
    fn single_channel_reads_a_scalar() {
        let krdg = lookup("KRDG?");
        let parsed = (krdg.parse.unwrap())(&args(&["5"]), "+4.215").unwrap();
        assert_eq!(parsed.as_f64(), Some(4.215));
    }

    #[test]
    fn reading_commands_accept_channel_zero_but_alarm_does_not() {
        assert!(lookup("KRDG?").validate_args(&args(&["0"])).is_ok());
        assert!(lookup("ALARM?").validate_args(&args(&["0"])).is_err());
        assert!(lookup("ALARM?").validate_args(&args(&["8"])).is_ok());
        assert!(lookup("KRDG?").validate_args(&args(&["9"])).is_err());
    }

    #[test]
    fn alarm_parameters_decode_to_named_fields() {
        let alarm = lookup("ALARM?");
        let parsed =
            (alarm.parse.unwrap())(&args(&["1"]), "1, 2, 300.0, 1.5, 0.5, 0").unwrap();
        assert_eq!(parsed["on/off"], 1);
        assert_eq!(parsed["source"], 2);
        assert_eq!(parsed["high"].as_f64(), Some(300.0));
        assert_eq!(parsed["latch"], 0);
    }

    #[test]
    fn analog_output_channel_is_restricted() {
        assert!(lookup("AOUT?").validate_args(&args(&["2"])).is_ok());
        let err = lookup("AOUT?").validate_args(&args(&["3"])).unwrap_err();
        assert!(err.to_string().contains("1 or 2"));
    }

    #[test]
    fn baud_rate_is_a_raw_integer() {
        let baud = lookup("BAUD?");
        assert_eq!(baud.arity(), 0);
        let parsed = (baud.parse.unwrap())(&[], "2").unwrap();
        assert_eq!(parsed, serde_json::Value::from(2));
    }
}
