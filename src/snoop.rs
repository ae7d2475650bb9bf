//! Passive decoders for traffic the bridge did not solicit.
//!
//! Each decoder is keyed on a source-address range and a payload prefix; it
//! synchronously projects the frame into the cache and must not block. The
//! payload layouts were reverse-engineered from observed bus captures.

use crate::protocol::{
    Frame, ProtocolEngine, AIR_HANDLER_RANGE, HEAT_PUMP_RANGE, ZONE_CONTROLLER_RANGE,
};
use crate::serial::Transport;
use crate::state::StateCache;

fn u16_be(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([data[off], data[off + 1]])
}

/// Register all known snoop decoders on an engine under construction.
pub fn attach_snoops<T: Transport + 'static>(engine: &mut ProtocolEngine<T>) {
    let (lo, hi) = HEAT_PUMP_RANGE;
    engine.snoop(lo, hi, snoop_heat_pump);
    let (lo, hi) = AIR_HANDLER_RANGE;
    engine.snoop(lo, hi, snoop_air_handler);
    let (lo, hi) = ZONE_CONTROLLER_RANGE;
    engine.snoop(lo, hi, snoop_dampers);
}

/// Heat pump telemetry: `00 3e 01` carries outside and coil temperature as
/// sixteenths of a degree; `00 3e 02` carries the stage in the upper bits of
/// its first byte.
pub fn snoop_heat_pump(cache: &StateCache, frame: &Frame) {
    let data = &frame.data;
    if data.len() < 3 {
        return;
    }

    let mut heat_pump = cache.heat_pump().unwrap_or_default();
    if data[..3] == [0x00, 0x3e, 0x01] && data.len() >= 7 {
        let body = &data[3..];
        heat_pump.outside_temp = f32::from(u16_be(body, 0)) / 16.0;
        heat_pump.coil_temp = f32::from(u16_be(body, 2)) / 16.0;
        log::debug!(
            "heat pump outside temp {}, coil temp {}",
            heat_pump.outside_temp,
            heat_pump.coil_temp
        );
        cache.update("mqtt/infinitive/outsideTemp", heat_pump.outside_temp);
        cache.update("mqtt/infinitive/coilTemp", heat_pump.coil_temp);
        cache.update("heatpump", heat_pump);
    } else if data[..3] == [0x00, 0x3e, 0x02] && data.len() >= 4 {
        heat_pump.stage = data[3] >> 1;
        log::debug!("heat pump stage {}", heat_pump.stage);
        cache.update("mqtt/infinitive/acStage", heat_pump.stage);
        cache.update("heatpump", heat_pump);
    }
}

/// Air handler telemetry: `00 03 06` carries the blower RPM; `00 03 16`
/// carries heat stage, airflow, static pressure, and the heating/cooling
/// activity bits.
pub fn snoop_air_handler(cache: &StateCache, frame: &Frame) {
    let data = &frame.data;
    if data.len() < 3 {
        return;
    }

    let mut air_handler = cache.air_handler().unwrap_or_default();
    if data[..3] == [0x00, 0x03, 0x06] && data.len() >= 6 {
        let body = &data[3..];
        air_handler.blower_rpm = u16_be(body, 1);
        log::debug!("blower RPM {}", air_handler.blower_rpm);
        cache.update("mqtt/infinitive/blowerRPM", air_handler.blower_rpm);
        cache.update("blower", air_handler);
    } else if data[..3] == [0x00, 0x03, 0x16] && data.len() >= 12 {
        let body = &data[3..];
        air_handler.heat_stage = body[0];
        air_handler.airflow_cfm = u16_be(body, 4);
        air_handler.static_pressure =
            ((f32::from(u16_be(body, 7)) / 65536.0 * 10000.0 + 0.5) as i32) as f32 / 10000.0;
        air_handler.elec_heat = body[0] & 0x03 != 0;
        air_handler.action = if body[2] & 0x03 != 0 {
            "cooling"
        } else if body[0] & 0x03 != 0 {
            "heating"
        } else {
            "idle"
        }
        .to_string();
        log::debug!(
            "air handler stage {} cfm {} action {}",
            air_handler.heat_stage,
            air_handler.airflow_cfm,
            air_handler.action
        );
        cache.update("mqtt/infinitive/heatStage", air_handler.heat_stage);
        cache.update("mqtt/infinitive/action", air_handler.action.clone());
        cache.update("mqtt/infinitive/airflowCFM", air_handler.airflow_cfm);
        cache.update("mqtt/infinitive/staticPressure", air_handler.static_pressure);
        cache.update("blower", air_handler);
    }
}

/// Zone damper positions: `00 03 19` carries one byte per zone on a 0–15
/// scale; `0xff` means unknown and leaves the cached value untouched.
pub fn snoop_dampers(cache: &StateCache, frame: &Frame) {
    let data = &frame.data;
    if data.len() < 11 || data[..3] != [0x00, 0x03, 0x19] {
        return;
    }

    let body = &data[3..];
    let mut dampers = cache.damper_position().unwrap_or_default();
    for zi in 0..8 {
        if body[zi] != 0xff {
            dampers.damper_pos[zi] = body[zi];
            let percent = (u16::from(body[zi]) * 100 / 15) as u8;
            cache.update(&format!("mqtt/infinitive/zone/{}/damperPos", zi + 1), percent);
        }
    }
    log::debug!("zone damper positions {:?}", dampers.damper_pos);
    cache.update("damperpos", dampers);
}
