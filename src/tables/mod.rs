//! Register table descriptions for devices on the bus.
//!
//! Each known table is a named structured blob at a 3-byte address in some
//! device's register space. The layout knowledge lives in the per-table
//! `decode`/`encode` implementations; the registry below names every table
//! the bridge understands so raw probes can be labeled.

pub mod translate;
pub mod tstat;

pub use tstat::{TStatCurrentParams, TStatSettings, TStatZoneParams};

use std::fmt;

/// 3-byte register table selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableAddr(pub [u8; 3]);

impl TableAddr {
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl fmt::Display for TableAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{table}: {detail}")]
pub struct DecodeError {
    pub table: &'static str,
    pub detail: String,
}

impl DecodeError {
    pub fn short(table: &'static str, need: usize, have: usize) -> Self {
        Self {
            table,
            detail: format!("need {need} bytes, have {have}"),
        }
    }
}

/// A register table with a known field layout.
///
/// Multi-byte scalars are big-endian on the wire. `decode` accepts the table
/// body (after the 3-byte address echo in a read response); `encode` produces
/// exactly `SIZE` bytes.
pub trait Table: Sized {
    const NAME: &'static str;
    const ADDRESS: TableAddr;
    const SIZE: usize;

    fn decode(data: &[u8]) -> Result<Self, DecodeError>;
    fn encode(&self) -> Vec<u8>;
}

/// Registry entry describing one known table.
pub struct TableDescriptor {
    pub name: &'static str,
    pub device: u16,
    pub addr: TableAddr,
    pub size: usize,
    /// Union of the write-mask bits a caller may legally set; 0 = read-only.
    pub writable_mask: u8,
}

pub const KNOWN_TABLES: &[TableDescriptor] = &[
    TableDescriptor {
        name: TStatCurrentParams::NAME,
        device: crate::protocol::DEV_TSTAT,
        addr: TStatCurrentParams::ADDRESS,
        size: TStatCurrentParams::SIZE,
        writable_mask: 0x10,
    },
    TableDescriptor {
        name: TStatZoneParams::NAME,
        device: crate::protocol::DEV_TSTAT,
        addr: TStatZoneParams::ADDRESS,
        size: TStatZoneParams::SIZE,
        writable_mask: 0x0f,
    },
    TableDescriptor {
        name: TStatSettings::NAME,
        device: crate::protocol::DEV_TSTAT,
        addr: TStatSettings::ADDRESS,
        size: TStatSettings::SIZE,
        writable_mask: 0x00,
    },
];

/// Look up a known table by owning device and address.
pub fn lookup(device: u16, addr: TableAddr) -> Option<&'static TableDescriptor> {
    KNOWN_TABLES
        .iter()
        .find(|t| t.device == device && t.addr == addr)
}
