//! User-facing mutation path: translate `(zone, param, value)` requests into
//! masked table writes.

use crate::protocol::{ProtocolError, ProtocolHandle, DEV_TSTAT};
use crate::tables::translate::{string_fan_mode_to_raw, string_mode_to_raw};
use crate::tables::{TStatCurrentParams, TStatZoneParams};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Bus(#[from] ProtocolError),
}

fn invalid(msg: String) -> ControlError {
    log::error!("putConfig: {msg}");
    ControlError::InvalidArgument(msg)
}

/// Apply one configuration change.
///
/// `zone == "0"` addresses global parameters (only `mode`); `"1"`..`"8"`
/// address per-zone parameters. Nothing is written to the bus unless the
/// whole request validates.
pub async fn put_config(
    bus: &ProtocolHandle,
    zone: &str,
    param: &str,
    value: &str,
) -> Result<(), ControlError> {
    let zn: u8 = zone
        .parse()
        .map_err(|_| invalid(format!("invalid zone value '{zone}'")))?;

    if zn == 0 {
        return put_global(bus, param, value).await;
    }
    if !(1..=8).contains(&zn) {
        return Err(invalid(format!("invalid zone number {zn}")));
    }

    let zi = zn - 1;
    let mut params = TStatZoneParams::default();
    let mask: u8;

    match param {
        "fanMode" => {
            let mode = string_fan_mode_to_raw(value)
                .ok_or_else(|| invalid(format!("invalid fan mode '{value}' for zone {zn}")))?;
            params.zone_fan_mode[zi as usize] = mode;
            mask = 0x01;
        }
        "heatSetpoint" => {
            let sp: u8 = value
                .parse()
                .map_err(|_| invalid(format!("invalid heat setpoint '{value}' for zone {zn}")))?;
            params.zone_heat_setpoint[zi as usize] = sp;
            mask = 0x04;
        }
        "coolSetpoint" => {
            let sp: u8 = value
                .parse()
                .map_err(|_| invalid(format!("invalid cool setpoint '{value}' for zone {zn}")))?;
            params.zone_cool_setpoint[zi as usize] = sp;
            mask = 0x08;
        }
        "hold" => {
            let hold = match value {
                "true" => true,
                "false" => false,
                _ => return Err(invalid(format!("invalid hold value '{value}' for zone {zn}"))),
            };
            // assert only this zone's bit; leave the bitmap zeroed to clear
            if hold {
                params.zone_hold = 0x01 << zi;
            }
            mask = 0x02;
        }
        "preset" => {
            let hold = match value {
                "hold" => true,
                "none" => false,
                _ => {
                    return Err(invalid(format!(
                        "invalid preset value '{value}' for zone {zn}"
                    )))
                }
            };
            if hold {
                params.zone_hold = 0x01 << zi;
            }
            mask = 0x02;
        }
        _ => {
            return Err(invalid(format!(
                "invalid parameter name '{param}' for zone {zn}"
            )))
        }
    }

    log::info!("writing zone {zn} config, mask {mask:#04x}");
    bus.write_table_zoned(DEV_TSTAT, &params, zi, mask).await?;
    Ok(())
}

async fn put_global(bus: &ProtocolHandle, param: &str, value: &str) -> Result<(), ControlError> {
    match param {
        "mode" => {
            let mode = string_mode_to_raw(value)
                .ok_or_else(|| invalid(format!("invalid mode value '{value}'")))?;
            let params = TStatCurrentParams {
                mode,
                ..Default::default()
            };
            bus.write_table(DEV_TSTAT, &params, 0x10).await?;
            Ok(())
        }
        _ => Err(invalid(format!("invalid parameter name '{param}'"))),
    }
}
