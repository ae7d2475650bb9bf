use std::io::{Read, Write};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{Result, SerialError, Transport, BAUD_RATE};

const POLL_DELAY_MS: u64 = 5;

/// The physical RS-485 serial adapter.
///
/// Opened once at startup and handed to the protocol engine, which holds it
/// for the life of the process. The port is released when the link is dropped.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialLink {
    /// Open `path` at the fixed ABCD bus line parameters.
    pub fn open(path: &str) -> Result<Self> {
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(POLL_DELAY_MS))
            .open()
            .map_err(|e| SerialError::OpenFailed {
                path: path.to_string(),
                source: e,
            })?;

        log::info!("opened serial port {} at {} 8N1", path, BAUD_RATE);
        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Transport for SerialLink {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes).map_err(SerialError::Io)?;
        self.port.flush().map_err(SerialError::Io)?;
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.port.bytes_to_read() {
                Ok(0) => {
                    if Instant::now() >= deadline {
                        return Ok(0);
                    }
                    tokio::time::sleep(Duration::from_millis(POLL_DELAY_MS)).await;
                }
                Ok(_) => {
                    return match self.port.read(buf) {
                        Ok(n) => Ok(n),
                        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                        Err(e) => Err(SerialError::Io(e)),
                    };
                }
                Err(e) => return Err(SerialError::Serialport(e)),
            }
        }
    }
}
