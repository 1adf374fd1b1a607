//! Declarative command metadata.
//!
//! Every instrument vocabulary is a `static` table of [`CommandDescriptor`]
//! values. A descriptor carries the wire token, an optional alias token some
//! instruments require for the same logical command, a positional argument
//! template, the query/write kind, and function pointers for semantic
//! validation and response parsing. A single generic executor
//! ([`crate::command::executor`]) validates, formats, sends and parses any
//! command from its descriptor — descriptors are the only extension point
//! for new instrument vocabularies.
//!
//! Argument arity is inferred from the number of `{}` placeholders in the
//! primary template and enforced centrally before the semantic validator
//! runs, so a descriptor's arity and its enforced count cannot drift apart.

use anyhow::{bail, Result};
use serde_json::Value;

/// Semantic argument check. Runs after the arity check; `Ok(())` accepts.
pub type Validator = fn(&[String]) -> Result<()>;

/// Response parser for query commands. Receives the original arguments and
/// the raw reply text; returns the parsed value placed in the envelope.
pub type ResponseParser = fn(&[String], &str) -> Result<Value>;

/// Whether a command performs a round trip or a one-way send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Write-then-read round trip; the reply is parsed.
    Query,
    /// One-way send; no reply is read.
    Write,
}

/// Static metadata for one instrument command.
#[derive(Debug, Clone, Copy)]
pub struct CommandDescriptor {
    /// Canonical wire token, e.g. `"KRDG?"`. Also the lookup key.
    pub name: &'static str,
    /// Alternate wire token some instruments require for the same logical
    /// command (e.g. the SMS supply's `GET MID` for canonical `MID`).
    /// The alias wins at execution time.
    pub alias: Option<&'static str>,
    /// Positional format template for the arguments, e.g. `"{},{}"`.
    /// Arity is the number of `{}` placeholders.
    pub args: &'static str,
    /// Template paired with the alias token. May consume fewer arguments
    /// than the primary template.
    pub alias_args: &'static str,
    pub kind: CommandKind,
    pub validate: Option<Validator>,
    pub parse: Option<ResponseParser>,
}

impl CommandDescriptor {
    /// Starts a query descriptor with no arguments, validator or parser.
    pub const fn query(name: &'static str) -> Self {
        Self {
            name,
            alias: None,
            args: "",
            alias_args: "",
            kind: CommandKind::Query,
            validate: None,
            parse: None,
        }
    }

    /// Starts a write descriptor with no arguments or validator.
    pub const fn write(name: &'static str) -> Self {
        Self {
            name,
            alias: None,
            args: "",
            alias_args: "",
            kind: CommandKind::Write,
            validate: None,
            parse: None,
        }
    }

    pub const fn with_args(mut self, args: &'static str) -> Self {
        self.args = args;
        self
    }

    pub const fn with_alias(mut self, alias: &'static str, alias_args: &'static str) -> Self {
        self.alias = Some(alias);
        self.alias_args = alias_args;
        self
    }

    pub const fn with_validator(mut self, validate: Validator) -> Self {
        self.validate = Some(validate);
        self
    }

    pub const fn with_parser(mut self, parse: ResponseParser) -> Self {
        self.parse = Some(parse);
        self
    }

    /// Argument count inferred from the primary template.
    pub fn arity(&self) -> usize {
        placeholder_count(self.args)
    }

    /// Checks the argument count against the inferred arity, then runs the
    /// semantic validator if one is declared.
    pub fn validate_args(&self, pars: &[String]) -> Result<()> {
        let expected = self.arity();
        if pars.len() != expected {
            bail!(
                "Number of parameters ({}) does not match expectation ({})",
                pars.len(),
                expected
            );
        }
        if let Some(validate) = self.validate {
            validate(pars)?;
        }
        Ok(())
    }

    /// Builds the wire string for validated arguments. Uses the alias pair
    /// when an alias is declared, otherwise the canonical pair.
    pub fn wire(&self, pars: &[String]) -> String {
        match self.alias {
            Some(alias) => join_command(alias, self.alias_args, pars),
            None => join_command(self.name, self.args, pars),
        }
    }

    /// Builds the canonical-name form regardless of alias. This is the form
    /// a remote caller embeds in an envelope `CMD`, to be re-split by the
    /// receiving driver.
    pub fn instruction(&self, pars: &[String]) -> String {
        join_command(self.name, self.args, pars)
    }
}

/// Number of `{}` placeholders in a template.
pub fn placeholder_count(template: &str) -> usize {
    template.matches("{}").count()
}

/// Fills `{}` placeholders positionally. Arguments beyond the placeholder
/// count are ignored (alias templates may consume fewer than the primary).
fn fill_template(template: &str, pars: &[String]) -> String {
    let mut out = String::with_capacity(template.len() + pars.len() * 4);
    let mut pieces = template.split("{}");
    if let Some(first) = pieces.next() {
        out.push_str(first);
    }
    for (piece, par) in pieces.zip(pars.iter()) {
        out.push_str(par);
        out.push_str(piece);
    }
    out
}

fn join_command(token: &str, template: &str, pars: &[String]) -> String {
    format!("{} {}", token, fill_template(template, pars))
        .trim()
        .to_string()
}

// Shared validators used across instrument tables.

/// Parses an integer argument and checks it against an inclusive range.
pub fn validate_int_range(par: &str, low: i64, high: i64) -> Result<()> {
    let value: i64 = par.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "Parameter must be an integer in the range [{}:{}], instead got {}",
            low,
            high,
            par
        )
    })?;
    if value < low || value > high {
        bail!(
            "Parameter must be in the range [{}:{}], but got {}",
            low,
            high,
            par
        );
    }
    Ok(())
}

/// Parses a float argument and checks it against an inclusive range.
pub fn validate_float_range(par: &str, low: f64, high: f64) -> Result<()> {
    let value: f64 = par.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "Parameter must be a number in the range [{}:{}], instead got {}",
            low,
            high,
            par
        )
    })?;
    if value < low || value > high {
        bail!(
            "Parameter must be in the range [{}:{}], but got {}",
            low,
            high,
            par
        );
    }
    Ok(())
}

/// Checks that an argument is one of an allowed token set.
pub fn validate_choice(par: &str, allowed: &[&str]) -> Result<()> {
    if !allowed.contains(&par) {
        bail!("Parameter must be one of {:?}, instead got {}", allowed, par);
    }
    Ok(())
}

// Shared parsers used across instrument tables.

/// Parses the reply as a single float.
pub fn parse_f64(_pars: &[String], raw: &str) -> Result<Value> {
    let value: f64 = raw.trim().parse()?;
    Ok(Value::from(value))
}

/// Parses the reply as a single integer.
pub fn parse_i64(_pars: &[String], raw: &str) -> Result<Value> {
    let value: i64 = raw.trim().parse()?;
    Ok(Value::from(value))
}

/// Splits a comma-separated reply into trimmed fields.
pub fn split_fields(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).collect()
}
