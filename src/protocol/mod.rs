pub mod engine;
pub mod frame;

pub use engine::{BusStats, EngineConfig, ProtocolEngine, ProtocolHandle, ResponseMatch};
pub use frame::{crc16, hex_string, Frame, FrameParser, Op, ParseError, ParseEvent};

use crate::tables::DecodeError;

/// The thermostat's bus address.
pub const DEV_TSTAT: u16 = 0x2001;
/// The address this bridge claims when originating requests.
pub const DEV_BRIDGE: u16 = 0x3001;
/// System broadcast address.
pub const DEV_BROADCAST: u16 = 0xf1f1;

/// Source-address ranges used to scope snoop subscriptions.
pub const AIR_HANDLER_RANGE: (u16, u16) = (0x4000, 0x42ff);
pub const HEAT_PUMP_RANGE: (u16, u16) = (0x5000, 0x51ff);
pub const ZONE_CONTROLLER_RANGE: (u16, u16) = (0x6000, 0x61ff);

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("no response after {attempts} attempts")]
    Timeout { attempts: u8 },

    #[error("device {device:#06x} refused the request")]
    Refused { device: u16 },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("protocol engine has shut down")]
    EngineGone,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
