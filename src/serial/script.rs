//! Scripted in-memory transport used by the integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Result, Transport};

/// A [`Transport`] that plays back a script instead of touching hardware.
///
/// Chunks pushed with [`push_incoming`](Self::push_incoming) are delivered to
/// subsequent reads as unsolicited bus traffic. Replies queued with
/// [`queue_reply`](Self::queue_reply) are delivered one per write, modeling a
/// device answering a request. Every write is recorded and can be inspected
/// through the handle returned by [`writes`](Self::writes).
#[derive(Default)]
pub struct ScriptedPort {
    incoming: VecDeque<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to arrive as unsolicited inbound traffic.
    pub fn push_incoming(&mut self, bytes: Vec<u8>) {
        self.incoming.push_back(bytes);
    }

    /// Queue a reply delivered after the next unanswered write.
    pub fn queue_reply(&mut self, bytes: Vec<u8>) {
        self.replies.push_back(bytes);
    }

    /// Shared handle to the record of written byte strings.
    pub fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.writes)
    }
}

#[async_trait]
impl Transport for ScriptedPort {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writes.lock().unwrap().push(bytes.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.incoming.push_back(reply);
        }
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.incoming.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.incoming.push_front(chunk[n..].to_vec());
                }
                Ok(n)
            }
            None => {
                tokio::time::sleep(timeout).await;
                Ok(0)
            }
        }
    }
}
