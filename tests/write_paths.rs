//! Mutation path: put_config through to the bytes on the wire.

use std::sync::Arc;
use std::time::Duration;

use infinity_bridge::control::{put_config, ControlError};
use infinity_bridge::protocol::{Frame, Op, ProtocolEngine, ProtocolHandle, DEV_BRIDGE, DEV_TSTAT};
use infinity_bridge::serial::ScriptedPort;
use infinity_bridge::state::StateCache;
use infinity_bridge::tables::{Table, TStatCurrentParams, TStatZoneParams};
use infinity_bridge::EngineConfig;

type Writes = std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>;

/// Engine over a scripted port that acks `acks` write requests.
fn write_harness(acks: usize) -> (ProtocolHandle, Writes) {
    let mut port = ScriptedPort::new();
    let writes = port.writes();
    for _ in 0..acks {
        port.queue_reply(Frame::new(DEV_BRIDGE, DEV_TSTAT, Op::WriteResponse, vec![]).encode());
    }

    let cache = Arc::new(StateCache::new());
    let bus = ProtocolEngine::new(port, cache)
        .with_config(EngineConfig {
            deadline: Duration::from_millis(40),
            ..Default::default()
        })
        .spawn();
    (bus, writes)
}

#[tokio::test]
async fn heat_setpoint_write_layout() {
    let (bus, writes) = write_harness(1);

    put_config(&bus, "2", "heatSetpoint", "68").await.unwrap();

    let wire = writes.lock().unwrap();
    assert_eq!(wire.len(), 1, "exactly one write request expected");

    let frame = Frame::decode(&wire[0]).unwrap();
    assert_eq!(frame.op, Op::WriteRequest);
    assert_eq!(frame.dest, DEV_TSTAT);
    assert_eq!(&frame.data[..3], TStatZoneParams::ADDRESS.as_bytes());
    assert_eq!(frame.data[3], 1, "0-based zone index");
    assert_eq!(frame.data[4], 0x04, "heat setpoint write mask");

    // zone 2's heat setpoint slot inside the table body
    let body = &frame.data[5..];
    assert_eq!(body.len(), TStatZoneParams::SIZE);
    assert_eq!(body[9 + 1], 68);
}

#[tokio::test]
async fn fan_mode_and_cool_setpoint_masks() {
    let (bus, writes) = write_harness(2);

    put_config(&bus, "1", "fanMode", "high").await.unwrap();
    put_config(&bus, "3", "coolSetpoint", "75").await.unwrap();

    let wire = writes.lock().unwrap();
    assert_eq!(wire.len(), 2);

    let fan = Frame::decode(&wire[0]).unwrap();
    assert_eq!(fan.data[3], 0);
    assert_eq!(fan.data[4], 0x01);
    assert_eq!(fan.data[5], 3, "fan mode byte for zone 1");

    let cool = Frame::decode(&wire[1]).unwrap();
    assert_eq!(cool.data[3], 2);
    assert_eq!(cool.data[4], 0x08);
    assert_eq!(cool.data[5 + 17 + 2], 75);
}

#[tokio::test]
async fn hold_sets_only_target_zone_bit() {
    let (bus, writes) = write_harness(2);

    put_config(&bus, "4", "hold", "true").await.unwrap();
    put_config(&bus, "4", "hold", "false").await.unwrap();

    let wire = writes.lock().unwrap();

    let set = Frame::decode(&wire[0]).unwrap();
    assert_eq!(set.data[4], 0x02, "hold write mask");
    assert_eq!(set.data[5 + 8], 0b0000_1000, "only zone 4's bit asserted");

    // clearing hold sends an all-zero bitmap
    let clear = Frame::decode(&wire[1]).unwrap();
    assert_eq!(clear.data[4], 0x02);
    assert_eq!(clear.data[5 + 8], 0x00);
}

#[tokio::test]
async fn preset_mirrors_hold_semantics() {
    let (bus, writes) = write_harness(1);

    put_config(&bus, "2", "preset", "hold").await.unwrap();

    let wire = writes.lock().unwrap();
    let frame = Frame::decode(&wire[0]).unwrap();
    assert_eq!(frame.data[4], 0x02);
    assert_eq!(frame.data[5 + 8], 0b0000_0010);
}

#[tokio::test]
async fn global_mode_write() {
    let (bus, writes) = write_harness(1);

    put_config(&bus, "0", "mode", "heat").await.unwrap();

    let wire = writes.lock().unwrap();
    let frame = Frame::decode(&wire[0]).unwrap();
    assert_eq!(frame.op, Op::WriteRequest);
    assert_eq!(&frame.data[..3], TStatCurrentParams::ADDRESS.as_bytes());
    // global writes carry no zone byte; the mask comes first
    assert_eq!(frame.data[3], 0x10);
    let body = &frame.data[4..];
    assert_eq!(body.len(), TStatCurrentParams::SIZE);
    assert_eq!(body[19], 1, "raw heat mode");
}

#[tokio::test]
async fn invalid_requests_write_nothing() {
    let (bus, writes) = write_harness(0);

    for (zone, param, value) in [
        ("9", "fanMode", "low"),
        ("x", "fanMode", "low"),
        ("2", "paint", "blue"),
        ("2", "fanMode", "hurricane"),
        ("2", "hold", "maybe"),
        ("0", "fanMode", "low"),
        ("2", "heatSetpoint", "warm"),
    ] {
        let err = put_config(&bus, zone, param, value).await.unwrap_err();
        assert!(
            matches!(err, ControlError::InvalidArgument(_)),
            "{zone}/{param}/{value} should be rejected"
        );
    }

    assert!(
        writes.lock().unwrap().is_empty(),
        "no bytes may reach the bus for rejected requests"
    );
}
