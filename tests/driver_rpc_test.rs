//! End-to-end driver RPC tests over mock transports.
//!
//! Exercises the full path a remote caller sees: request envelope in,
//! reply envelope out, with the executor, registry and instrument tables in
//! between.

use std::time::Duration;

use serde_json::{json, Value};

use cryo_control::command::ExecutorConfig;
use cryo_control::driver::InstrumentDriver;
use cryo_control::instruments::{executor_config_for, registry_for, InstrumentKind};
use cryo_control::protocol::{unix_now, Request};
use cryo_control::transport::MockTransport;

fn fast(config: ExecutorConfig) -> ExecutorConfig {
    ExecutorConfig {
        command_delay: Duration::ZERO,
        ..config
    }
}

fn spawn_ls350(transport: MockTransport) -> cryo_control::driver::DriverHandle {
    let (handle, _task) = InstrumentDriver::spawn(
        "LS350.driver",
        registry_for(InstrumentKind::Ls350).unwrap(),
        transport,
        fast(executor_config_for(InstrumentKind::Ls350)),
    );
    handle
}

fn spawn_sms(transport: MockTransport, reply_timeout: Duration) -> cryo_control::driver::DriverHandle {
    let config = ExecutorConfig {
        reply_timeout,
        ..fast(executor_config_for(InstrumentKind::Sms))
    };
    let (handle, _task) = InstrumentDriver::spawn(
        "SMS.driver",
        registry_for(InstrumentKind::Sms).unwrap(),
        transport,
        config,
    );
    handle
}

#[tokio::test]
async fn query_reply_carries_parsed_map_and_timing() {
    let transport = MockTransport::new().with_reply("RAMP? 1", "1, 2.5");
    let handle = spawn_ls350(transport);

    let before = unix_now();
    let reply = handle.send(Request::query("RAMP? 1")).await.unwrap();

    assert_eq!(reply.error, vec![""]);
    let line = &reply.result[0];
    assert_eq!(line.result, json!({"On/Off": 1, "Rate": 2.5}));
    assert!(line.t1 >= line.t0);
    assert!(line.t0 >= before);
    assert!(reply.t0 <= line.t0 && line.t1 <= reply.t1);
}

#[tokio::test]
async fn batch_with_invalid_segment_still_runs_the_rest() {
    let transport = MockTransport::new()
        .with_reply("KRDG? A", "+4.215")
        .with_reply("SETP? 1", "+4.000");
    let log = transport.call_log_handle();
    let handle = spawn_ls350(transport);

    // First segment has a bad input letter and must never hit the wire.
    let reply = handle
        .send(Request::query("KRDG? Q;KRDG? A;SETP? 1"))
        .await
        .unwrap();

    assert_eq!(reply.result.len(), 3);
    assert_eq!(reply.error.len(), 3);
    assert!(reply.error[0].contains("instead got Q"));
    assert_eq!(reply.result[0].result, Value::from(""));
    assert_eq!(reply.result[0].t0, -1.0);
    assert_eq!(reply.result[1].as_f64(), Some(4.215));
    assert_eq!(reply.result[2].as_f64(), Some(4.0));
    // Only the two valid segments reached the transport.
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unrecognized_method_rejects_the_whole_envelope() {
    let transport = MockTransport::new().with_reply("KRDG? A", "+4.215");
    let log = transport.call_log_handle();
    let handle = spawn_ls350(transport);

    let reply = handle
        .send(Request {
            method: "FETCH".to_string(),
            cmd: "KRDG? A;KRDG? B".to_string(),
        })
        .await
        .unwrap();

    assert!(reply.result.is_empty());
    assert_eq!(reply.error, vec!["Unrecognized METHOD: FETCH"]);
    assert_eq!(log.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn write_then_query_shares_one_serialized_transport() {
    let transport = MockTransport::new().with_reply("SETP? 1", "+4.000");
    let log = transport.call_log_handle();
    let handle = spawn_ls350(transport);

    handle.write_line("SETP 1,4.0").await.unwrap();
    let envelope = handle.query_line("SETP? 1").await.unwrap();
    assert_eq!(envelope.as_f64(), Some(4.0));

    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["write SETP 1,4.0", "query SETP? 1"]
    );
}

#[tokio::test]
async fn ieee488_commands_work_on_every_lakeshore() {
    let transport = MockTransport::new().with_reply("*IDN?", "LSCI,MODEL350,SN123,1.2");
    let handle = spawn_ls350(transport);

    let envelope = handle.query_line("*IDN?").await.unwrap();
    assert_eq!(envelope.result, Value::from("LSCI,MODEL350,SN123,1.2"));
}

#[tokio::test]
async fn sms_alias_and_status_discard_work_through_the_driver() {
    let transport = MockTransport::new();
    transport.enqueue_line("12:00:00 RAMP STATUS: RAMPING AT 0.5000 TESLA");
    transport.enqueue_line("12:00:01 OUTPUT: 0.5000 TESLA AT 2.5 VOLTS");
    let log = transport.call_log_handle();
    let handle = spawn_sms(transport, Duration::from_secs(1));

    let envelope = handle.query_line("OUTPUT T").await.unwrap();
    assert_eq!(envelope.result["value"].as_f64(), Some(0.5));
    assert_eq!(envelope.result["volts"].as_f64(), Some(2.5));
    // The canonical token went out as the supply's multi-word form, and the
    // status broadcast cost one extra read.
    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["query GET OUTPUT", "read"]
    );
}

#[tokio::test]
async fn endless_status_noise_becomes_a_bounded_transport_error() {
    let transport = MockTransport::new()
        .with_default_reply("12:00:00 RAMP STATUS: RAMPING")
        .with_read_default("12:00:00 RAMP STATUS: RAMPING");
    let handle = spawn_sms(transport, Duration::from_millis(50));

    let start = std::time::Instant::now();
    let reply = handle.send(Request::query("OUTPUT T")).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));

    let line = &reply.result[0];
    assert!(line.t0 > 0.0);
    assert_eq!(line.t1, -1.0);
    assert!(line.error.contains("within 50ms"), "{}", line.error);
}

#[tokio::test]
async fn envelopes_round_trip_through_json() {
    let transport = MockTransport::new().with_reply("KRDG? A", "+4.215");
    let handle = spawn_ls350(transport);

    let request: Request =
        serde_json::from_str(r#"{"METHOD": "QUERY", "CMD": "KRDG? A"}"#).unwrap();
    let reply = handle.send(request).await.unwrap();

    let wire = serde_json::to_value(&reply).unwrap();
    assert_eq!(wire["result"][0]["result"].as_f64(), Some(4.215));
    assert_eq!(wire["error"][0], "");
    assert!(wire["t0"].as_f64().unwrap() > 0.0);
}
