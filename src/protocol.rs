//! Message-envelope protocol.
//!
//! The request/reply pair exchanged across the driver boundary. The wire
//! encoding is whatever the carrier makes of these serde types; only the
//! field semantics are fixed:
//!
//! - request: `METHOD` (one of `READ`, `WRITE`, `QUERY`) and `CMD` (one or
//!   more `;`-separated instruction lines),
//! - reply: batch timestamps `t0`/`t1` plus parallel `result`/`error`
//!   sequences, one entry per `;`-segment in request order.
//!
//! Each instruction line additionally yields its own [`CommandResult`]
//! envelope with per-command timing, so a caller can tell "rejected before
//! touching hardware" (`t0 == -1`) from "hardware did not answer" from
//! "hardware answered but unparsable".

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recognized envelope methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Read,
    Write,
    Query,
}

impl Method {
    /// Parses the envelope `METHOD` field. Anything but the three recognized
    /// values is an envelope-level error.
    pub fn parse(method: &str) -> Result<Self, String> {
        match method {
            "READ" => Ok(Method::Read),
            "WRITE" => Ok(Method::Write),
            "QUERY" => Ok(Method::Query),
            other => Err(format!("Unrecognized METHOD: {other}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Read => "READ",
            Method::Write => "WRITE",
            Method::Query => "QUERY",
        }
    }
}

/// Request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "METHOD")]
    pub method: String,
    #[serde(rename = "CMD")]
    pub cmd: String,
}

impl Request {
    pub fn query(cmd: impl Into<String>) -> Self {
        Self {
            method: Method::Query.as_str().to_string(),
            cmd: cmd.into(),
        }
    }

    pub fn write(cmd: impl Into<String>) -> Self {
        Self {
            method: Method::Write.as_str().to_string(),
            cmd: cmd.into(),
        }
    }

    pub fn read() -> Self {
        Self {
            method: Method::Read.as_str().to_string(),
            cmd: String::new(),
        }
    }
}

/// Result envelope for one command within one instruction line.
///
/// `t0` is taken immediately before dispatch and `t1` immediately after the
/// transport call returns; both are `-1` when validation or lookup rejected
/// the command before any instrument I/O. Having both times brackets when
/// the command actually ran, for instruments that do not timestamp their
/// own readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub t0: f64,
    pub t1: f64,
    pub result: Value,
    pub error: String,
}

impl CommandResult {
    /// Envelope for a command rejected before dispatch.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            t0: -1.0,
            t1: -1.0,
            result: Value::from(""),
            error: error.into(),
        }
    }

    pub fn is_err(&self) -> bool {
        !self.error.is_empty()
    }

    /// The parsed value as `f64`, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        self.result.as_f64()
    }
}

/// Reply envelope for one request.
///
/// `result[i]` and `error[i]` correspond to the i-th `;`-segment of the
/// request `CMD`. A caller that sent a single instruction reads
/// `reply.result[0]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub t0: f64,
    pub t1: f64,
    pub result: Vec<CommandResult>,
    pub error: Vec<String>,
}

impl Reply {
    /// Envelope-level rejection (e.g. unrecognized `METHOD`): no line was
    /// executed.
    pub fn rejected(t0: f64, error: impl Into<String>) -> Self {
        Self {
            t0,
            t1: unix_now(),
            result: Vec::new(),
            error: vec![error.into()],
        }
    }

    /// First error string across the batch, if any segment failed.
    pub fn first_error(&self) -> Option<&str> {
        self.error.iter().find(|e| !e.is_empty()).map(String::as_str)
    }
}

/// Current Unix time in seconds, with sub-second resolution.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 * 1e-6
}
