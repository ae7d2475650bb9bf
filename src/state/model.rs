//! Typed per-subsystem projections assembled from table reads and snoops.
//!
//! Field names serialize to the JSON names the downstream HTTP/MQTT
//! collaborators consume.

use serde::Serialize;

use crate::tables::translate::{raw_action_to_string, raw_fan_mode_to_string, raw_mode_to_string};
use crate::tables::{TStatCurrentParams, TStatZoneParams};

/// One populated zone. Zones whose current temperature reads 0 or 255 are
/// absent from the projection; retained zones keep their 1-based index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneView {
    pub zone_number: u8,
    pub current_temp: u8,
    pub current_humidity: u8,
    pub target_humidity: u8,
    pub zone_name: String,
    pub fan_mode: String,
    pub hold: bool,
    pub preset: String,
    pub heat_setpoint: u8,
    pub cool_setpoint: u8,
    pub override_duration: String,
    pub override_duration_mins: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonesView {
    pub zones: Vec<ZoneView>,
    pub outdoor_temp: u8,
    pub mode: String,
    pub stage: u8,
    pub action: String,
    pub raw_mode: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AirHandlerView {
    #[serde(rename = "blowerRPM")]
    pub blower_rpm: u16,
    #[serde(rename = "airFlowCFM")]
    pub airflow_cfm: u16,
    pub static_pressure: f32,
    pub heat_stage: u8,
    pub elec_heat: bool,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatPumpView {
    pub coil_temp: f32,
    pub outside_temp: f32,
    pub stage: u8,
}

/// Positions are on the device's 0–15 scale; the flat mirror projects them
/// as percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DamperView {
    #[serde(rename = "damperPosition")]
    pub damper_pos: [u8; 8],
}

/// Format an override duration in minutes as `"H:MM"`, empty for zero.
pub fn hold_time(mins: u16) -> String {
    if mins == 0 {
        return String::new();
    }
    format!("{}:{:02}", mins / 60, mins % 60)
}

fn zone_active(current_temp: u8) -> bool {
    current_temp > 0 && current_temp < 255
}

fn make_zone(zi: usize, cfg: &TStatZoneParams, params: &TStatCurrentParams) -> ZoneView {
    let hold = cfg.zone_hold & (0x01 << zi) != 0;
    ZoneView {
        zone_number: zi as u8 + 1,
        current_temp: params.zone_temp[zi],
        current_humidity: params.zone_humidity[zi],
        target_humidity: cfg.zone_target_humidity[zi],
        zone_name: cfg.zone_name_string(zi),
        fan_mode: raw_fan_mode_to_string(cfg.zone_fan_mode[zi]).to_string(),
        hold,
        preset: if hold { "hold" } else { "none" }.to_string(),
        heat_setpoint: cfg.zone_heat_setpoint[zi],
        cool_setpoint: cfg.zone_cool_setpoint[zi],
        override_duration: hold_time(cfg.zone_override_mins[zi]),
        override_duration_mins: cfg.zone_override_mins[zi],
    }
}

/// Project the full thermostat view from one pair of table reads.
pub fn build_zones_view(cfg: &TStatZoneParams, params: &TStatCurrentParams) -> ZonesView {
    let zones = (0..8)
        .filter(|&zi| zone_active(params.zone_temp[zi]))
        .map(|zi| make_zone(zi, cfg, params))
        .collect();

    ZonesView {
        zones,
        outdoor_temp: params.outdoor_temp,
        mode: raw_mode_to_string(params.mode & 0x0f).to_string(),
        stage: params.mode >> 5,
        action: raw_action_to_string(params.mode >> 5).to_string(),
        raw_mode: params.mode,
    }
}

/// Project a single zone (0-based index) regardless of its active state.
/// Returns `None` for an out-of-range index.
pub fn build_zone_view(
    zi: usize,
    cfg: &TStatZoneParams,
    params: &TStatCurrentParams,
) -> Option<ZoneView> {
    if zi > 7 {
        return None;
    }
    Some(make_zone(zi, cfg, params))
}
