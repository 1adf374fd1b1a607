//! Generic command executor.
//!
//! Takes a raw instruction line, splits it into command name and arguments,
//! resolves the descriptor, validates, builds the wire string, performs the
//! transport round trip (or one-way write), parses the reply, and produces a
//! timestamped [`CommandResult`] envelope. Every failure path ends in an
//! envelope with a populated `error` field — `execute_line` never fails.
//!
//! The executor owns its transport exclusively; the instruments targeted are
//! half-duplex and corrupt state under concurrent access, so at most one
//! command is ever in flight per executor.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::command::registry::CommandRegistry;
use crate::error::{ControlError, ControlResult};
use crate::protocol::{unix_now, CommandResult};
use crate::transport::Transport;

/// Classifier for asynchronous unsolicited status lines. Returns `true`
/// when the line is a status broadcast to discard, not a command reply.
pub type StatusFilter = fn(&str) -> bool;

/// Tuning knobs for one executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Mandatory settle delay after a write command completes before the
    /// link may be reused.
    pub command_delay: Duration,
    /// Deadline for any single transport operation, and for the whole
    /// discard-and-retry loop of one query.
    pub reply_timeout: Duration,
    /// Optional unsolicited-status classifier (power-supply family).
    pub status_filter: Option<StatusFilter>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_delay: Duration::from_millis(50),
            reply_timeout: Duration::from_secs(1),
            status_filter: None,
        }
    }
}

/// Splits an instruction line into a command name and its arguments.
///
/// The rule every downstream driver depends on: split on commas, spaces and
/// `?`; trim tokens; drop empties; if the original line contained a `?`,
/// re-append it to the command token. `KRDG? 1`, `KRDG?1` and `KRDG?,1` all
/// yield command `KRDG?` with arguments `["1"]`.
pub fn split_line(line: &str) -> (String, Vec<String>) {
    let mut tokens = line
        .split(|c| c == ',' || c == ' ' || c == '?')
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let mut command = tokens.next().unwrap_or("").to_string();
    if line.contains('?') {
        command.push('?');
    }
    let pars = tokens.map(str::to_string).collect();
    (command, pars)
}

/// Validates, formats, dispatches and parses commands against one transport.
pub struct CommandExecutor<T: Transport> {
    registry: CommandRegistry,
    transport: T,
    config: ExecutorConfig,
}

impl<T: Transport> CommandExecutor<T> {
    pub fn new(registry: CommandRegistry, transport: T, config: ExecutorConfig) -> Self {
        Self {
            registry,
            transport,
            config,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Executes one instruction line end to end.
    pub async fn execute_line(&mut self, line: &str) -> CommandResult {
        let (name, pars) = split_line(line);

        let Some(descriptor) = self.registry.lookup(&name).copied() else {
            warn!(command = %name, "Unrecognized command");
            return CommandResult::rejected(format!("Unrecognized command: {name}"));
        };

        if let Err(error) = descriptor.validate_args(&pars) {
            warn!(
                command = %name,
                parameters = ?pars,
                "Command failed validation"
            );
            return CommandResult::rejected(error.to_string());
        }

        let wire = descriptor.wire(&pars);
        let is_query = self.registry.is_query(&name);
        let t0 = unix_now();

        if is_query {
            let raw = match self.query_with_retry(&wire).await {
                Ok(raw) => raw,
                Err(error) => {
                    warn!(command = %name, %error, "Query failed");
                    return CommandResult {
                        t0,
                        t1: -1.0,
                        result: Value::from(""),
                        error: error.to_string(),
                    };
                }
            };
            let t1 = unix_now();

            let result = match descriptor.parse {
                Some(parse) => match parse(&pars, &raw) {
                    Ok(value) => value,
                    Err(error) => {
                        warn!(command = %name, raw = %raw.trim(), %error, "Reply did not parse");
                        return CommandResult {
                            t0,
                            t1,
                            result: Value::from(""),
                            error: format!("Failed to parse response '{}': {error}", raw.trim()),
                        };
                    }
                },
                None => Value::from(raw),
            };

            let envelope = CommandResult {
                t0,
                t1,
                result,
                error: String::new(),
            };
            debug!(?envelope, "Command completed");
            envelope
        } else {
            let written = tokio::time::timeout(
                self.config.reply_timeout,
                self.transport.write(&wire),
            )
            .await
            .map_err(|_| ControlError::ReplyTimeout(self.config.reply_timeout))
            .and_then(|r| r);

            if let Err(error) = written {
                warn!(command = %name, %error, "Write failed");
                return CommandResult {
                    t0,
                    t1: -1.0,
                    result: Value::from(""),
                    error: error.to_string(),
                };
            }
            let t1 = unix_now();

            // Set commands take time to process; the delay elapses before
            // the executor accepts the next command.
            if !self.config.command_delay.is_zero() {
                tokio::time::sleep(self.config.command_delay).await;
            }

            let envelope = CommandResult {
                t0,
                t1,
                result: Value::from(""),
                error: String::new(),
            };
            debug!(?envelope, "Command completed");
            envelope
        }
    }

    /// Raw read for envelope `METHOD = READ`: one transport read, no lookup
    /// or validation.
    pub async fn read_raw(&mut self) -> CommandResult {
        let t0 = unix_now();
        let read = tokio::time::timeout(self.config.reply_timeout, self.transport.read())
            .await
            .map_err(|_| ControlError::ReplyTimeout(self.config.reply_timeout))
            .and_then(|r| r);

        match read {
            Ok(raw) => CommandResult {
                t0,
                t1: unix_now(),
                result: Value::from(raw),
                error: String::new(),
            },
            Err(error) => {
                warn!(%error, "Raw read failed");
                CommandResult {
                    t0,
                    t1: -1.0,
                    result: Value::from(""),
                    error: error.to_string(),
                }
            }
        }
    }

    /// Sends a query and keeps reading past unsolicited status lines until a
    /// genuine reply arrives or the reply deadline passes.
    async fn query_with_retry(&mut self, wire: &str) -> ControlResult<String> {
        let deadline = tokio::time::Instant::now() + self.config.reply_timeout;
        let timeout_err = || ControlError::ReplyTimeout(self.config.reply_timeout);

        let mut raw = tokio::time::timeout_at(deadline, self.transport.query(wire))
            .await
            .map_err(|_| timeout_err())
            .and_then(|r| r)?;

        if let Some(is_status) = self.config.status_filter {
            while is_status(&raw) {
                // A transport that answers instantly would never let
                // `timeout_at` fire, so check the deadline ourselves too.
                if tokio::time::Instant::now() >= deadline {
                    return Err(timeout_err());
                }
                debug!(line = %raw.trim(), "Discarding unsolicited status line");
                raw = tokio::time::timeout_at(deadline, self.transport.read())
                    .await
                    .map_err(|_| timeout_err())
                    .and_then(|r| r)?;
            }
        }

        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::descriptor::{
        parse_f64, split_fields, validate_choice, CommandDescriptor,
    };
    use crate::transport::MockTransport;
    use anyhow::Result;
    use serde_json::json;

    fn validate_input_number(pars: &[String]) -> Result<()> {
        validate_choice(&pars[0], &["1", "2", "3", "4"])
    }

    fn parse_ramp(_pars: &[String], raw: &str) -> Result<Value> {
        let fields = split_fields(raw);
        Ok(json!({
            "On/Off": fields[0].parse::<i64>()?,
            "Rate": fields[1].parse::<f64>()?,
        }))
    }

    static TEST_COMMANDS: &[CommandDescriptor] = &[
        CommandDescriptor::query("KRDG?")
            .with_args("{}")
            .with_parser(parse_f64),
        CommandDescriptor::query("RAMP?")
            .with_args("{}")
            .with_validator(validate_input_number)
            .with_parser(parse_ramp),
        CommandDescriptor::write("RAMP")
            .with_args("{},{},{}")
            .with_validator(validate_input_number),
        CommandDescriptor::query("MID")
            .with_args("{}")
            .with_alias("GET MID", ""),
        CommandDescriptor::query("*IDN?"),
    ];

    fn executor(transport: MockTransport, config: ExecutorConfig) -> CommandExecutor<MockTransport> {
        let registry = CommandRegistry::from_tables(&[TEST_COMMANDS]).unwrap();
        CommandExecutor::new(registry, transport, config)
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            command_delay: Duration::ZERO,
            ..ExecutorConfig::default()
        }
    }

    #[test]
    fn split_accepts_all_three_delimiter_styles() {
        for line in ["KRDG? A", "KRDG?A", "KRDG?,A"] {
            let (cmd, pars) = split_line(line);
            assert_eq!(cmd, "KRDG?", "line {line:?}");
            assert_eq!(pars, vec!["A".to_string()], "line {line:?}");
        }
    }

    #[test]
    fn split_handles_multiple_arguments_and_spaces() {
        let (cmd, pars) = split_line("RAMP 1, 0, 2.5");
        assert_eq!(cmd, "RAMP");
        assert_eq!(pars, vec!["1", "0", "2.5"]);

        let (cmd, pars) = split_line("  *IDN?  ");
        assert_eq!(cmd, "*IDN?");
        assert!(pars.is_empty());
    }

    #[test]
    fn split_then_reformat_is_canonical() {
        let descriptor = TEST_COMMANDS.iter().find(|d| d.name == "RAMP").unwrap();
        for line in ["RAMP 1,0,2.5", "RAMP,1,0,2.5", "RAMP 1 0 2.5"] {
            let (_, pars) = split_line(line);
            assert_eq!(descriptor.wire(&pars), "RAMP 1,0,2.5", "line {line:?}");
        }
    }

    #[tokio::test]
    async fn unknown_command_is_rejected_before_dispatch() {
        let transport = MockTransport::new();
        let log = transport.call_log_handle();
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("BOGUS? 1").await;
        assert_eq!(envelope.t0, -1.0);
        assert_eq!(envelope.t1, -1.0);
        assert_eq!(envelope.error, "Unrecognized command: BOGUS?");
        assert_eq!(log.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_the_instrument() {
        let transport = MockTransport::new().with_reply("RAMP? 9", "0,+1.0");
        let log = transport.call_log_handle();
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("RAMP? 9").await;
        assert_eq!(envelope.t0, -1.0);
        assert_eq!(envelope.t1, -1.0);
        assert!(envelope.error.contains("instead got 9"));
        assert_eq!(envelope.result, Value::from(""));
        assert_eq!(log.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn wrong_arity_is_a_validation_failure() {
        let transport = MockTransport::new();
        let log = transport.call_log_handle();
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("KRDG? A B").await;
        assert_eq!(
            envelope.error,
            "Number of parameters (2) does not match expectation (1)"
        );
        assert_eq!(log.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn query_round_trip_parses_multi_field_reply() {
        let transport = MockTransport::new().with_reply("RAMP? 1", "1, 2.5");
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("RAMP? 1").await;
        assert_eq!(envelope.error, "");
        assert_eq!(envelope.result, json!({"On/Off": 1, "Rate": 2.5}));
        assert!(envelope.t1 >= envelope.t0);
        assert!(envelope.t0 > 0.0);
    }

    #[tokio::test]
    async fn unparsed_query_passes_raw_text_through() {
        let transport = MockTransport::new().with_reply("*IDN?", "LSCI,MODEL350,123,1.0");
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("*IDN?").await;
        assert_eq!(envelope.result, Value::from("LSCI,MODEL350,123,1.0"));
    }

    #[tokio::test]
    async fn parse_failure_keeps_both_timestamps() {
        let transport = MockTransport::new().with_reply("KRDG? A", "not-a-number");
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("KRDG? A").await;
        assert!(envelope.t0 > 0.0);
        assert!(envelope.t1 >= envelope.t0);
        assert!(envelope.error.contains("Failed to parse response 'not-a-number'"));
    }

    #[tokio::test]
    async fn transport_failure_leaves_t1_unset() {
        let transport = MockTransport::new().with_reply("KRDG? A", "+4.2");
        transport.trigger_failure();
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("KRDG? A").await;
        assert!(envelope.t0 > 0.0);
        assert_eq!(envelope.t1, -1.0);
        assert!(envelope.error.contains("Mock transport failure"));
    }

    #[tokio::test]
    async fn alias_wins_on_the_wire() {
        let transport = MockTransport::new().with_reply("GET MID", "12:00:00 MID SETTING: 2.0");
        let log = transport.call_log_handle();
        let mut exec = executor(transport, fast_config());

        let envelope = exec.execute_line("MID T").await;
        assert_eq!(envelope.error, "");
        assert_eq!(log.lock().unwrap().clone(), vec!["query GET MID"]);
    }

    #[tokio::test]
    async fn write_applies_settle_delay_before_returning() {
        let transport = MockTransport::new();
        let config = ExecutorConfig {
            command_delay: Duration::from_millis(40),
            ..ExecutorConfig::default()
        };
        let mut exec = executor(transport, config);

        let start = std::time::Instant::now();
        let envelope = exec.execute_line("RAMP 1,0,2.5").await;
        assert_eq!(envelope.error, "");
        assert!(start.elapsed() >= Duration::from_millis(40));
        // t1 is stamped before the settle delay elapses.
        assert!(envelope.t1 <= unix_now() - 0.040 + 0.005);
    }

    #[tokio::test]
    async fn unsolicited_status_lines_are_discarded() {
        let transport = MockTransport::new();
        transport.enqueue_line("12:00:00 RAMP STATUS: RAMPING");
        transport.enqueue_line("12:00:00 HEATER STATUS: ON");
        transport.enqueue_line("12:00:01 MID SETTING: 2.0");
        let log = transport.call_log_handle();

        let config = ExecutorConfig {
            command_delay: Duration::ZERO,
            status_filter: Some(|line| line.contains("STATUS")),
            ..ExecutorConfig::default()
        };
        let mut exec = executor(transport, config);

        let envelope = exec.execute_line("MID T").await;
        assert_eq!(envelope.error, "");
        assert_eq!(envelope.result, Value::from("12:00:01 MID SETTING: 2.0"));
        // One query plus two retry reads.
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["query GET MID", "read", "read"]
        );
    }

    #[tokio::test]
    async fn endless_status_noise_hits_the_deadline() {
        let transport = MockTransport::new()
            .with_default_reply("12:00:00 RAMP STATUS: RAMPING")
            .with_read_default("12:00:00 RAMP STATUS: RAMPING");

        let config = ExecutorConfig {
            command_delay: Duration::ZERO,
            reply_timeout: Duration::from_millis(50),
            status_filter: Some(|line| line.contains("STATUS")),
        };
        let mut exec = executor(transport, config);

        let start = std::time::Instant::now();
        let envelope = exec.execute_line("MID T").await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(envelope.t0 > 0.0);
        assert_eq!(envelope.t1, -1.0);
        assert!(envelope.error.contains("within 50ms"), "{}", envelope.error);
    }

    #[tokio::test]
    async fn raw_read_returns_whatever_is_pending() {
        let transport = MockTransport::new();
        transport.enqueue_line("leftover line");
        let mut exec = executor(transport, fast_config());

        let envelope = exec.read_raw().await;
        assert_eq!(envelope.result, Value::from("leftover line"));
        assert!(envelope.t1 >= envelope.t0);
    }
}
