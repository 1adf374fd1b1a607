//! Mock transport for testing without hardware.
//!
//! Provides canned replies keyed by wire string, an ordered script of lines
//! that takes precedence over the canned map, failure injection, and a call
//! log for verifying what the executor put on the wire (and how often).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::transport::Transport;

/// Scriptable in-memory transport.
pub struct MockTransport {
    /// Wire string → reply for queries.
    replies: HashMap<String, String>,
    /// Ordered lines returned (in order) by `query`/`read` before the map
    /// is consulted. Lets tests interleave unsolicited status lines.
    script: Mutex<VecDeque<String>>,
    /// Fallback reply when neither script nor map matches.
    default_reply: Option<String>,
    /// Fallback line for bare reads once the script is drained.
    read_default: Option<String>,
    should_fail_next: AtomicBool,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            script: Mutex::new(VecDeque::new()),
            default_reply: None,
            read_default: None,
            should_fail_next: AtomicBool::new(false),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers a canned reply for an exact wire string.
    pub fn with_reply(mut self, wire: &str, reply: &str) -> Self {
        self.replies.insert(wire.to_string(), reply.to_string());
        self
    }

    /// Sets the reply used when no script line or canned reply matches.
    pub fn with_default_reply(mut self, reply: &str) -> Self {
        self.default_reply = Some(reply.to_string());
        self
    }

    /// Sets the line returned by bare `read` calls once the script is empty.
    pub fn with_read_default(mut self, line: &str) -> Self {
        self.read_default = Some(line.to_string());
        self
    }

    /// Appends a line to the ordered reply script.
    pub fn enqueue_line(&self, line: &str) {
        self.script.lock().unwrap().push_back(line.to_string());
    }

    /// Makes the next transport call fail.
    pub fn trigger_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Clone of the call log: one `"op line"` entry per transport call.
    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    /// Shared handle to the call log, usable after the transport is moved
    /// into an executor or driver task.
    pub fn call_log_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_log)
    }

    pub fn calls(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    fn log_call(&self, op: &str, line: &str) {
        self.call_log
            .lock()
            .unwrap()
            .push(format!("{op} {line}").trim().to_string());
    }

    fn take_failure(&self) -> ControlResult<()> {
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            Err(ControlError::Transport("Mock transport failure".into()))
        } else {
            Ok(())
        }
    }

    fn next_scripted(&self) -> Option<String> {
        self.script.lock().unwrap().pop_front()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, line: &str) -> ControlResult<usize> {
        self.log_call("write", line);
        self.take_failure()?;
        Ok(line.len())
    }

    async fn query(&mut self, line: &str) -> ControlResult<String> {
        self.log_call("query", line);
        self.take_failure()?;
        if let Some(scripted) = self.next_scripted() {
            return Ok(scripted);
        }
        if let Some(reply) = self.replies.get(line) {
            return Ok(reply.clone());
        }
        if let Some(default) = &self.default_reply {
            return Ok(default.clone());
        }
        Err(ControlError::Transport(format!(
            "No mock reply registered for '{line}'"
        )))
    }

    async fn read(&mut self) -> ControlResult<String> {
        self.log_call("read", "");
        self.take_failure()?;
        if let Some(scripted) = self.next_scripted() {
            return Ok(scripted);
        }
        if let Some(default) = &self.read_default {
            return Ok(default.clone());
        }
        Err(ControlError::Transport("Nothing to read".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_reply_matches_exact_wire() {
        let mut mock = MockTransport::new().with_reply("KRDG? A", "+4.215");
        assert_eq!(mock.query("KRDG? A").await.unwrap(), "+4.215");
        assert!(mock.query("KRDG? B").await.is_err());
    }

    #[tokio::test]
    async fn script_takes_precedence_over_map() {
        let mut mock = MockTransport::new().with_reply("GET OUTPUT", "12:00:01 OUTPUT: 1.0");
        mock.enqueue_line("12:00:00 RAMP STATUS: RAMPING");
        assert_eq!(
            mock.query("GET OUTPUT").await.unwrap(),
            "12:00:00 RAMP STATUS: RAMPING"
        );
        assert_eq!(
            mock.query("GET OUTPUT").await.unwrap(),
            "12:00:01 OUTPUT: 1.0"
        );
    }

    #[tokio::test]
    async fn failure_is_one_shot() {
        let mut mock = MockTransport::new().with_reply("*IDN?", "MOCK");
        mock.trigger_failure();
        assert!(mock.query("*IDN?").await.is_err());
        assert_eq!(mock.query("*IDN?").await.unwrap(), "MOCK");
    }

    #[tokio::test]
    async fn call_log_records_operations_in_order() {
        let mut mock = MockTransport::new().with_reply("*IDN?", "MOCK");
        mock.write("*RST").await.unwrap();
        mock.query("*IDN?").await.unwrap();
        assert_eq!(mock.call_log(), vec!["write *RST", "query *IDN?"]);
    }
}
