//! Bridge and observer for the ABCD/RS-485 bus used by Carrier Infinity
//! HVAC systems.
//!
//! The bridge frames, validates, and routes bus traffic, keeps a live
//! queryable model of the system (zones, air handler, heat pump, dampers)
//! in a concurrent cache, and accepts mutation requests for a small set of
//! user-facing parameters.

pub mod control;
pub mod protocol;
pub mod serial;
pub mod snoop;
pub mod state;
pub mod tables;

pub use control::{put_config, ControlError};
pub use protocol::{
    EngineConfig, Frame, Op, ProtocolEngine, ProtocolError, ProtocolHandle, DEV_TSTAT,
};
pub use serial::{ScriptedPort, SerialLink, Transport};
pub use snoop::attach_snoops;
pub use state::{StateCache, Value};
