pub mod link;
pub mod script;

pub use link::SerialLink;
pub use script::ScriptedPort;

use std::time::Duration;

use async_trait::async_trait;

/// ABCD bus line parameters: 38400 8N1, no flow control.
pub const BAUD_RATE: u32 = 38400;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        source: serialport::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialport error: {0}")]
    Serialport(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Byte-level access to the half-duplex bus.
///
/// The protocol engine owns exactly one transport and is the only caller.
/// `read_chunk` returns 0 on timeout rather than erroring, so a quiet line
/// is indistinguishable from a slow one at this layer.
#[async_trait]
pub trait Transport: Send {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever is available within `timeout`, up to `buf.len()` bytes.
    async fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}
