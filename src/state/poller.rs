//! Periodic drivers: the 1 s state refresh and the 15 s stats report.

use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{self, ProtocolHandle, DEV_TSTAT};
use crate::state::model::{build_zone_view, build_zones_view, ZoneView};
use crate::state::StateCache;
use crate::tables::{self, TableAddr, TStatCurrentParams, TStatZoneParams};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const STATS_INTERVAL: Duration = Duration::from_secs(15);

/// Register addresses probed one-per-tick to aid mapping of undocumented
/// tables.
pub const DEFAULT_PROBE_TABLES: &[u16] = &[
    0x3b04, 0x3b05, 0x3b06, 0x3b0e, 0x3b0f, 0x3d02, 0x3d03,
];

const MIRROR_PREFIX: &str = "mqtt/infinitive";

/// Refresh the thermostat projection and its flat mirror keys every second.
///
/// Both tables carry all 8 zones, so one pair of transactions covers the
/// whole system. A failed read skips the tick; the next cycle repairs it.
pub async fn state_poller(bus: ProtocolHandle, cache: Arc<StateCache>, probes: Vec<u16>) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut probe_cursor = 0usize;

    loop {
        interval.tick().await;

        match poll_once(&bus, &cache).await {
            Ok(()) => {}
            Err(e) => {
                log::debug!("poll skipped: {e}");
                continue;
            }
        }

        if !probes.is_empty() {
            probe_raw(&bus, probes[probe_cursor]).await;
            probe_cursor = (probe_cursor + 1) % probes.len();
        }
    }
}

/// One poll tick: read both thermostat tables and commit the projection.
pub async fn poll_once(bus: &ProtocolHandle, cache: &StateCache) -> protocol::Result<()> {
    let cfg: TStatZoneParams = bus.read_table(DEV_TSTAT).await?;
    let params: TStatCurrentParams = bus.read_table(DEV_TSTAT).await?;

    let view = build_zones_view(&cfg, &params);

    let mut humidity = 0u8;
    for zone in &view.zones {
        let zp = format!("{MIRROR_PREFIX}/zone/{}", zone.zone_number);
        cache.update(&format!("{zp}/currentTemp"), zone.current_temp);
        cache.update(&format!("{zp}/humidity"), zone.current_humidity);
        humidity = zone.current_humidity;
        cache.update(&format!("{zp}/coolSetpoint"), zone.cool_setpoint);
        cache.update(&format!("{zp}/heatSetpoint"), zone.heat_setpoint);
        cache.update(&format!("{zp}/fanMode"), zone.fan_mode.clone());
        cache.update(&format!("{zp}/hold"), zone.hold);
        cache.update(&format!("{zp}/overrideDuration"), zone.override_duration.clone());
        cache.update(&format!("{zp}/preset"), zone.preset.clone());
        cache.update(&format!("{zp}/targetHumidity"), zone.target_humidity);
    }

    if humidity > 0 {
        cache.update(&format!("{MIRROR_PREFIX}/humidity"), humidity);
    }
    cache.update(&format!("{MIRROR_PREFIX}/outdoorTemp"), view.outdoor_temp);
    cache.update(&format!("{MIRROR_PREFIX}/mode"), view.mode.clone());
    cache.update(&format!("{MIRROR_PREFIX}/rawMode"), view.raw_mode);
    cache.update("tstat", view);

    Ok(())
}

/// On-demand single-zone projection (0-based index), using the same pair of
/// table reads as a poll tick.
pub async fn read_zone_config(
    bus: &ProtocolHandle,
    zi: usize,
) -> protocol::Result<Option<ZoneView>> {
    let cfg: TStatZoneParams = bus.read_table(DEV_TSTAT).await?;
    let params: TStatCurrentParams = bus.read_table(DEV_TSTAT).await?;
    Ok(build_zone_view(zi, &cfg, &params))
}

/// Read one register from the rotating probe list and log what came back.
async fn probe_raw(bus: &ProtocolHandle, register: u16) {
    let addr = TableAddr::new(0x00, (register >> 8) as u8, (register & 0xff) as u8);
    let label = tables::lookup(DEV_TSTAT, addr).map_or("?", |t| t.name);
    match bus.read_raw(DEV_TSTAT, addr).await {
        Ok(body) => log::debug!(
            "RAW {:04x}/{addr} ({label}): {}",
            DEV_TSTAT,
            protocol::hex_string(&body)
        ),
        Err(e) => log::debug!("RAW {:04x}/{addr} ({label}): {e}", DEV_TSTAT),
    }
}

/// Log the engine's counters every 15 seconds.
pub async fn stats_poller(bus: ProtocolHandle) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        interval.tick().await;
        log::info!("#STATS# {}", bus.stats_string());
    }
}
