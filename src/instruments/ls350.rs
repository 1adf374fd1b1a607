//! Lakeshore 350 temperature controller.
//!
//! Four sensor inputs (A–D), two main heater outputs plus two analog
//! outputs, closed-loop setpoint control with ramping. Inputs are addressed
//! by letter for readings and by number for control-loop commands; the
//! heater-range argument is range-checked against the output it applies to.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::command::descriptor::{
    parse_f64, split_fields, validate_float_range, validate_int_range, CommandDescriptor,
};

fn validate_input_letter(input: &str, include_all: bool) -> Result<()> {
    let valid: &[&str] = if include_all {
        &["A", "B", "C", "D", "0"]
    } else {
        &["A", "B", "C", "D"]
    };
    if !valid.contains(&input) {
        bail!("Input must be one of {:?}, instead got {}", valid, input);
    }
    Ok(())
}

fn validate_letter(pars: &[String]) -> Result<()> {
    validate_input_letter(&pars[0], true)
}

fn validate_letter_no_all(pars: &[String]) -> Result<()> {
    validate_input_letter(&pars[0], false)
}

fn validate_input_number(input: &str) -> Result<()> {
    match input.trim().parse::<i64>() {
        Ok(n) if (1..=4).contains(&n) => Ok(()),
        _ => bail!("Input must be one of [1, 2, 3, 4], instead got {}", input),
    }
}

fn validate_number(pars: &[String]) -> Result<()> {
    validate_input_number(&pars[0])
}

fn validate_heater_output(output: &str) -> Result<()> {
    match output.trim().parse::<i64>() {
        Ok(1) | Ok(2) => Ok(()),
        _ => bail!("Heater output must be one of [1, 2], instead got {}", output),
    }
}

fn validate_heater(pars: &[String]) -> Result<()> {
    validate_heater_output(&pars[0])
}

fn validate_brightness(pars: &[String]) -> Result<()> {
    validate_int_range(&pars[0], 1, 32)
        .map_err(|_| anyhow::anyhow!("Brightness must be between 1 and 32, instead got {}", pars[0]))
}

fn validate_ramp_on_off(on_or_off: &str) -> Result<()> {
    match on_or_off.trim().parse::<i64>() {
        Ok(0) | Ok(1) => Ok(()),
        _ => bail!(
            "Ramp mode must be either 0=Off or 1=On, instead got {}",
            on_or_off
        ),
    }
}

// 0 means infinite ramp rate.
fn validate_ramp_rate(rate: &str) -> Result<()> {
    validate_float_range(rate, 0.0, 100.0)
        .map_err(|_| anyhow::anyhow!("Ramp rate must be between 0 and 100. 0 means infinite ramp rate."))
}

fn validate_ramp(pars: &[String]) -> Result<()> {
    validate_input_number(&pars[0])?;
    validate_ramp_on_off(&pars[1])?;
    validate_ramp_rate(&pars[2])
}

/// Outputs 1–2 take ranges 0–5, the analog outputs 3–4 only 0–1.
fn validate_heater_range(output: &str, heater_range: &str) -> Result<()> {
    let output: i64 = output.trim().parse()?;
    let range: i64 = heater_range.trim().parse().map_err(|_| {
        anyhow::anyhow!("Heater range must be an integer, instead got {}", heater_range)
    })?;
    match output {
        1 | 2 if !(0..=5).contains(&range) => bail!(
            "Heater range must be an integer between 0 and 5 for outputs [1, 2], instead got {}",
            range
        ),
        3 | 4 if !(0..=1).contains(&range) => bail!(
            "Heater range must be either 0 or 1 for outputs [3, 4], instead got {}",
            range
        ),
        _ => Ok(()),
    }
}

fn validate_range_cmd(pars: &[String]) -> Result<()> {
    validate_input_number(&pars[0])?;
    validate_heater_range(&pars[0], &pars[1])
}

fn validate_setpoint(pars: &[String]) -> Result<()> {
    validate_input_number(&pars[0])?;
    pars[1]
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow::anyhow!("Setpoint must be a number, instead got {}", pars[1]))?;
    Ok(())
}

fn validate_pid(pars: &[String]) -> Result<()> {
    validate_input_number(&pars[0])
}

fn parse_i64_scalar(_pars: &[String], raw: &str) -> Result<Value> {
    Ok(Value::from(raw.trim().parse::<i64>()?))
}

/// Ramp status replies with extra text after the flag; only the first
/// character carries the answer.
fn parse_first_char_int(_pars: &[String], raw: &str) -> Result<Value> {
    let first = raw
        .trim()
        .chars()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty response"))?;
    Ok(Value::from(
        first
            .to_digit(10)
            .ok_or_else(|| anyhow::anyhow!("Expected a digit, got '{first}'"))? as i64,
    ))
}

fn parse_ramp_parameters(_pars: &[String], raw: &str) -> Result<Value> {
    let fields = split_fields(raw);
    if fields.len() < 2 {
        bail!("Expected 2 fields, got {}", fields.len());
    }
    Ok(json!({
        "On/Off": fields[0].parse::<i64>()?,
        "Rate": fields[1].parse::<f64>()?,
    }))
}

fn parse_heater_setup(_pars: &[String], raw: &str) -> Result<Value> {
    let fields = split_fields(raw);
    if fields.len() < 4 {
        bail!("Expected 4 fields, got {}", fields.len());
    }
    Ok(json!({
        "Resistance": fields[0].parse::<i64>()?,
        "Max Current": fields[1].parse::<i64>()?,
        "Max User": fields[2].parse::<f64>()?,
        "Current/Power": fields[3].parse::<i64>()?,
    }))
}

fn parse_pid(_pars: &[String], raw: &str) -> Result<Value> {
    let fields = split_fields(raw);
    if fields.len() < 3 {
        bail!("Expected 3 fields, got {}", fields.len());
    }
    Ok(json!({
        "P": fields[0].parse::<f64>()?,
        "I": fields[1].parse::<f64>()?,
        "D": fields[2].parse::<f64>()?,
    }))
}

/// LS350 command table.
pub static LS350_COMMANDS: &[CommandDescriptor] = &[
    CommandDescriptor::query("BRIGT?").with_parser(parse_i64_scalar),
    CommandDescriptor::write("BRIGT")
        .with_args("{}")
        .with_validator(validate_brightness),
    CommandDescriptor::query("CRDG?")
        .with_args("{}")
        .with_validator(validate_letter)
        .with_parser(parse_f64),
    CommandDescriptor::query("KRDG?")
        .with_args("{}")
        .with_validator(validate_letter)
        .with_parser(parse_f64),
    CommandDescriptor::query("SRDG?")
        .with_args("{}")
        .with_validator(validate_letter)
        .with_parser(parse_f64),
    CommandDescriptor::query("HTR?")
        .with_args("{}")
        .with_validator(validate_heater)
        .with_parser(parse_f64),
    CommandDescriptor::query("RAMP?")
        .with_args("{}")
        .with_validator(validate_number)
        .with_parser(parse_ramp_parameters),
    CommandDescriptor::write("RAMP")
        .with_args("{},{},{}")
        .with_validator(validate_ramp),
    CommandDescriptor::query("RAMPST?")
        .with_args("{}")
        .with_validator(validate_number)
        .with_parser(parse_first_char_int),
    CommandDescriptor::query("RANGE?")
        .with_args("{}")
        .with_validator(validate_number)
        .with_parser(parse_i64_scalar),
    CommandDescriptor::write("RANGE")
        .with_args("{},{}")
        .with_validator(validate_range_cmd),
    CommandDescriptor::query("HTRSET?")
        .with_args("{}")
        .with_validator(validate_heater)
        .with_parser(parse_heater_setup),
    CommandDescriptor::query("RDGST?")
        .with_args("{}")
        .with_validator(validate_letter_no_all)
        .with_parser(parse_i64_scalar),
    CommandDescriptor::query("SETP?")
        .with_args("{}")
        .with_validator(validate_number)
        .with_parser(parse_f64),
    CommandDescriptor::write("SETP")
        .with_args("{},{}")
        .with_validator(validate_setpoint),
    CommandDescriptor::query("PID?")
        .with_args("{}")
        .with_validator(validate_number)
        .with_parser(parse_pid),
    CommandDescriptor::write("PID")
        .with_args("{},{},{},{}")
        .with_validator(validate_pid),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::{registry_for, InstrumentKind};

    fn args(pars: &[&str]) -> Vec<String> {
        pars.iter().map(|s| s.to_string()).collect()
    }

    fn lookup(name: &str) -> CommandDescriptor {
        *LS350_COMMANDS.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn table_composes_with_common_commands() {
        let registry = registry_for(InstrumentKind::Ls350).unwrap();
        assert!(registry.is_query("RAMP?"));
        assert!(registry.is_write("RAMP"));
        assert!(registry.is_query("*STB?"));
    }

    #[test]
    fn input_letters_accept_zero_only_where_meaningful() {
        assert!(lookup("KRDG?").validate_args(&args(&["0"])).is_ok());
        assert!(lookup("KRDG?").validate_args(&args(&["D"])).is_ok());
        assert!(lookup("KRDG?").validate_args(&args(&["E"])).is_err());
        assert!(lookup("RDGST?").validate_args(&args(&["0"])).is_err());
        assert!(lookup("RDGST?").validate_args(&args(&["A"])).is_ok());
    }

    #[test]
    fn ramp_write_validates_all_three_fields() {
        let ramp = lookup("RAMP");
        assert!(ramp.validate_args(&args(&["1", "1", "2.5"])).is_ok());
        assert!(ramp.validate_args(&args(&["5", "1", "2.5"])).is_err());
        assert!(ramp.validate_args(&args(&["1", "2", "2.5"])).is_err());
        assert!(ramp.validate_args(&args(&["1", "1", "101"])).is_err());
        assert_eq!(ramp.wire(&args(&["1", "1", "2.5"])), "RAMP 1,1,2.5");
    }

    #[test]
    fn heater_range_depends_on_output() {
        let range = lookup("RANGE");
        assert!(range.validate_args(&args(&["1", "5"])).is_ok());
        assert!(range.validate_args(&args(&["1", "6"])).is_err());
        // Analog outputs 3 and 4 only take ranges 0-1.
        assert!(range.validate_args(&args(&["3", "1"])).is_ok());
        assert!(range.validate_args(&args(&["3", "2"])).is_err());
    }

    #[test]
    fn ramp_parameters_decode_to_named_fields() {
        let parsed = (lookup("RAMP?").parse.unwrap())(&args(&["1"]), "1, 2.5").unwrap();
        assert_eq!(parsed, json!({"On/Off": 1, "Rate": 2.5}));
    }

    #[test]
    fn ramp_status_reads_only_the_first_character() {
        let parsed = (lookup("RAMPST?").parse.unwrap())(&args(&["1"]), "1 ").unwrap();
        assert_eq!(parsed, Value::from(1));
        assert!((lookup("RAMPST?").parse.unwrap())(&args(&["1"]), "").is_err());
    }

    #[test]
    fn heater_setup_decodes_to_named_fields() {
        let parsed =
            (lookup("HTRSET?").parse.unwrap())(&args(&["1"]), "1, 2, 0.5, 1").unwrap();
        assert_eq!(parsed["Resistance"], 1);
        assert_eq!(parsed["Max Current"], 2);
        assert_eq!(parsed["Max User"].as_f64(), Some(0.5));
        assert_eq!(parsed["Current/Power"], 1);
    }

    #[test]
    fn pid_round_trip() {
        let parsed = (lookup("PID?").parse.unwrap())(&args(&["1"]), "50.0, 20.0, 0.0").unwrap();
        assert_eq!(parsed["P"].as_f64(), Some(50.0));
        let pid = lookup("PID");
        assert_eq!(pid.arity(), 4);
        assert_eq!(pid.wire(&args(&["1", "50", "20", "0"])), "PID 1,50,20,0");
    }

    #[test]
    fn brightness_bounds() {
        let brigt = lookup("BRIGT");
        assert!(brigt.validate_args(&args(&["1"])).is_ok());
        assert!(brigt.validate_args(&args(&["32"])).is_ok());
        let err = brigt.validate_args(&args(&["0"])).unwrap_err();
        assert!(err.to_string().contains("between 1 and 32"));
    }
}
