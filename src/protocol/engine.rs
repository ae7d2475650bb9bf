//! The bus protocol engine.
//!
//! One task owns the serial transport and runs both halves of the protocol:
//! the reader side feeds the incremental frame parser and fans accepted
//! frames out to the pending transaction and the snoop registry; the writer
//! side serves queued transactions one at a time, enforcing the half-duplex
//! bus's single-outstanding-request rule with retry and deadline handling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep, Instant};

use super::frame::{Frame, FrameParser, Op, ParseEvent};
use super::{ProtocolError, Result, DEV_BRIDGE};
use crate::serial::Transport;
use crate::state::StateCache;
use crate::tables::{Table, TableAddr};

/// How long a single read poll blocks before the loop re-checks housekeeping.
const READ_POLL: Duration = Duration::from_millis(25);
/// Housekeeping tick used to check the transaction deadline.
const TICK: Duration = Duration::from_millis(5);
/// Backoff after a serial read error before retrying the line.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

const COMMAND_QUEUE: usize = 32;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Response deadline per attempt.
    pub deadline: Duration,
    /// Total attempts per transaction (first send plus retries).
    pub attempts: u8,
    /// Log every accepted inbound frame under the `resplog` target.
    pub log_frames: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(200),
            attempts: 3,
            log_frames: false,
        }
    }
}

/// Bus traffic counters, shared between the engine task and its handles.
#[derive(Debug, Default)]
pub struct BusStats {
    requests: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    nacks: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    crc_errors: AtomicU64,
    snoops_dispatched: AtomicU64,
}

impl BusStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn nacks(&self) -> u64 {
        self.nacks.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn crc_errors(&self) -> u64 {
        self.crc_errors.load(Ordering::Relaxed)
    }

    pub fn snoops_dispatched(&self) -> u64 {
        self.snoops_dispatched.load(Ordering::Relaxed)
    }

    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn stats_string(&self) -> String {
        format!(
            "requests={} retries={} timeouts={} nacks={} rxFrames={} rxBytes={} crcErrors={} snoops={}",
            self.requests(),
            self.retries(),
            self.timeouts(),
            self.nacks(),
            self.frames_received(),
            self.bytes_received(),
            self.crc_errors(),
            self.snoops_dispatched(),
        )
    }
}

/// Predicate a response frame must satisfy to complete a transaction.
#[derive(Debug, Clone, Copy)]
pub enum ResponseMatch {
    /// A read response from `source` echoing the requested table address.
    ReadResponse { source: u16, table: TableAddr },
    /// A write response or ACK from `source`.
    WriteAck { source: u16 },
}

impl ResponseMatch {
    pub fn matches(&self, frame: &Frame) -> bool {
        match *self {
            ResponseMatch::ReadResponse { source, table } => {
                frame.src == source
                    && frame.op == Op::ReadResponse
                    && frame.data.len() >= 3
                    && frame.data[..3] == table.0
            }
            ResponseMatch::WriteAck { source } => {
                frame.src == source && matches!(frame.op, Op::WriteResponse | Op::Ack)
            }
        }
    }
}

/// Passive observer invoked for inbound frames whose source address falls in
/// the registered range. Runs on the engine task; must not block.
pub type SnoopHandler = fn(&StateCache, &Frame);

struct SnoopEntry {
    low: u16,
    high: u16,
    handler: SnoopHandler,
}

enum BusCommand {
    Transaction {
        request: Frame,
        expect: ResponseMatch,
        responder: oneshot::Sender<Result<Frame>>,
    },
}

struct PendingTransaction {
    device: u16,
    wire: Vec<u8>,
    expect: ResponseMatch,
    responder: oneshot::Sender<Result<Frame>>,
    deadline: Instant,
    attempt: u8,
}

/// Engine under construction: attach snoops, then [`spawn`](Self::spawn).
pub struct ProtocolEngine<T: Transport> {
    transport: T,
    cache: Arc<StateCache>,
    snoops: Vec<SnoopEntry>,
    config: EngineConfig,
}

impl<T: Transport + 'static> ProtocolEngine<T> {
    pub fn new(transport: T, cache: Arc<StateCache>) -> Self {
        Self {
            transport,
            cache,
            snoops: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a snoop over the closed source-address range `[low, high]`.
    pub fn snoop(&mut self, low: u16, high: u16, handler: SnoopHandler) {
        self.snoops.push(SnoopEntry { low, high, handler });
    }

    /// Start the engine task and return the cloneable caller handle.
    pub fn spawn(self) -> ProtocolHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let stats = Arc::new(BusStats::default());
        tokio::spawn(run_loop(
            self.transport,
            cmd_rx,
            self.snoops,
            self.cache,
            self.config,
            Arc::clone(&stats),
        ));
        ProtocolHandle { cmd_tx, stats }
    }
}

/// Cloneable handle for issuing transactions against the bus.
#[derive(Clone)]
pub struct ProtocolHandle {
    cmd_tx: mpsc::Sender<BusCommand>,
    stats: Arc<BusStats>,
}

impl ProtocolHandle {
    /// Submit one request/response transaction. Queued transactions are
    /// served strictly one at a time.
    pub async fn transaction(&self, request: Frame, expect: ResponseMatch) -> Result<Frame> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(BusCommand::Transaction {
                request,
                expect,
                responder: tx,
            })
            .await
            .map_err(|_| ProtocolError::EngineGone)?;
        rx.await.map_err(|_| ProtocolError::EngineGone)?
    }

    /// Read a raw table body (the bytes after the 3-byte address echo).
    pub async fn read_raw(&self, device: u16, addr: TableAddr) -> Result<Vec<u8>> {
        let request = Frame::new(device, DEV_BRIDGE, Op::ReadRequest, addr.as_bytes().to_vec());
        let response = self
            .transaction(request, ResponseMatch::ReadResponse {
                source: device,
                table: addr,
            })
            .await?;
        Ok(response.data[3..].to_vec())
    }

    /// Read and decode a known table from `device`.
    pub async fn read_table<Tb: Table>(&self, device: u16) -> Result<Tb> {
        let body = self.read_raw(device, Tb::ADDRESS).await?;
        Ok(Tb::decode(&body)?)
    }

    /// Write `table` to `device`; the mask selects which fields the device
    /// applies.
    pub async fn write_table<Tb: Table>(&self, device: u16, table: &Tb, mask: u8) -> Result<()> {
        let mut payload = Tb::ADDRESS.as_bytes().to_vec();
        payload.push(mask);
        payload.extend(table.encode());
        self.write_payload(device, payload).await
    }

    /// Zoned write: the device applies the masked fields to the named zone's
    /// slots only (0-based zone index).
    pub async fn write_table_zoned<Tb: Table>(
        &self,
        device: u16,
        table: &Tb,
        zone: u8,
        mask: u8,
    ) -> Result<()> {
        let mut payload = Tb::ADDRESS.as_bytes().to_vec();
        payload.push(zone);
        payload.push(mask);
        payload.extend(table.encode());
        self.write_payload(device, payload).await
    }

    async fn write_payload(&self, device: u16, payload: Vec<u8>) -> Result<()> {
        let request = Frame::new(device, DEV_BRIDGE, Op::WriteRequest, payload);
        self.transaction(request, ResponseMatch::WriteAck { source: device })
            .await
            .map(|_| ())
    }

    pub fn stats(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats_string(&self) -> String {
        self.stats.stats_string()
    }
}

async fn run_loop<T: Transport>(
    transport: T,
    mut cmd_rx: mpsc::Receiver<BusCommand>,
    snoops: Vec<SnoopEntry>,
    cache: Arc<StateCache>,
    config: EngineConfig,
    stats: Arc<BusStats>,
) {
    let transport = Arc::new(Mutex::new(transport));
    let mut parser = FrameParser::new();
    let mut pending: Option<PendingTransaction> = None;

    loop {
        tokio::select! {
            maybe_cmd = cmd_rx.recv(), if pending.is_none() => {
                let Some(BusCommand::Transaction { request, expect, responder }) = maybe_cmd else {
                    break;
                };
                settle_line(&transport, &mut parser, &mut pending, &snoops, &cache, &config, &stats).await;

                BusStats::add(&stats.requests, 1);
                let wire = request.encode();
                if let Err(e) = transport.lock().await.write_all(&wire).await {
                    // transient line fault: the deadline tick resends this attempt
                    log::error!("request write failed: {e}");
                }
                pending = Some(PendingTransaction {
                    device: request.dest,
                    wire,
                    expect,
                    responder,
                    deadline: Instant::now() + config.deadline,
                    attempt: 1,
                });
            }

            read_res = read_some(&transport) => {
                match read_res {
                    Ok(Some(chunk)) => {
                        BusStats::add(&stats.bytes_received, chunk.len() as u64);
                        parser.feed(&chunk);
                        drain_parser(&mut parser, &mut pending, &snoops, &cache, &config, &stats);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // transient line fault: any pending transaction stays
                        // armed and the deadline tick drives the retry
                        log::error!("serial read failed: {e}");
                        sleep(READ_ERROR_BACKOFF).await;
                    }
                }
            }

            _ = sleep(TICK), if pending.is_some() => {
                let expired = pending
                    .as_ref()
                    .map_or(false, |p| Instant::now() >= p.deadline);
                if expired {
                    // a straggling response may still be on the line; drain it
                    // before deciding to retransmit (it can complete the
                    // transaction and make the retry moot)
                    settle_line(&transport, &mut parser, &mut pending, &snoops, &cache, &config, &stats).await;
                    if let Some(mut p) = pending.take() {
                        if p.attempt < config.attempts {
                            p.attempt += 1;
                            BusStats::add(&stats.retries, 1);
                            log::debug!("no response from {:#06x}, retry {}/{}", p.device, p.attempt, config.attempts);
                            if let Err(e) = transport.lock().await.write_all(&p.wire).await {
                                // the failed attempt burns its retry slot
                                log::error!("retry write failed: {e}");
                            }
                            p.deadline = Instant::now() + config.deadline;
                            pending = Some(p);
                        } else {
                            BusStats::add(&stats.timeouts, 1);
                            log::warn!("transaction to {:#06x} timed out after {} attempts", p.device, p.attempt);
                            let _ = p.responder.send(Err(ProtocolError::Timeout { attempts: p.attempt }));
                        }
                    }
                }
            }
        }
    }

    log::info!("protocol engine stopped");
}

async fn read_some<T: Transport>(
    transport: &Arc<Mutex<T>>,
) -> crate::serial::Result<Option<Vec<u8>>> {
    let mut buf = [0u8; 512];
    let n = transport.lock().await.read_chunk(&mut buf, READ_POLL).await?;
    if n == 0 {
        Ok(None)
    } else {
        Ok(Some(buf[..n].to_vec()))
    }
}

/// Drain any inbound frame still being assembled before claiming the line
/// for a transmit. A partial that stops growing is line noise; transmit
/// anyway.
async fn settle_line<T: Transport>(
    transport: &Arc<Mutex<T>>,
    parser: &mut FrameParser,
    pending: &mut Option<PendingTransaction>,
    snoops: &[SnoopEntry],
    cache: &StateCache,
    config: &EngineConfig,
    stats: &BusStats,
) {
    while !parser.is_idle() {
        match read_some(transport).await {
            Ok(Some(chunk)) => {
                BusStats::add(&stats.bytes_received, chunk.len() as u64);
                parser.feed(&chunk);
                drain_parser(parser, pending, snoops, cache, config, stats);
            }
            Ok(None) => break,
            Err(e) => {
                log::error!("serial read failed while settling line: {e}");
                break;
            }
        }
    }
}

fn drain_parser(
    parser: &mut FrameParser,
    pending: &mut Option<PendingTransaction>,
    snoops: &[SnoopEntry],
    cache: &StateCache,
    config: &EngineConfig,
    stats: &BusStats,
) {
    while let Some(event) = parser.next_event() {
        match event {
            ParseEvent::Frame(frame) => {
                handle_frame(frame, pending, snoops, cache, config, stats)
            }
            ParseEvent::CrcError => BusStats::add(&stats.crc_errors, 1),
        }
    }
}

fn handle_frame(
    frame: Frame,
    pending: &mut Option<PendingTransaction>,
    snoops: &[SnoopEntry],
    cache: &StateCache,
    config: &EngineConfig,
    stats: &BusStats,
) {
    BusStats::add(&stats.frames_received, 1);
    if config.log_frames {
        log::info!(target: "resplog", "{frame}");
    }

    if let Some(p) = pending.take() {
        if p.expect.matches(&frame) {
            let _ = p.responder.send(Ok(frame.clone()));
        } else if frame.src == p.device && frame.op == Op::Nack {
            BusStats::add(&stats.nacks, 1);
            let _ = p.responder.send(Err(ProtocolError::Refused { device: p.device }));
        } else {
            // unrelated traffic; the transaction stays pending
            *pending = Some(p);
        }
    }

    for entry in snoops {
        if (entry.low..=entry.high).contains(&frame.src) {
            (entry.handler)(cache, &frame);
            BusStats::add(&stats.snoops_dispatched, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_response_match() {
        let addr = TableAddr::new(0x00, 0x3b, 0x02);
        let m = ResponseMatch::ReadResponse {
            source: 0x2001,
            table: addr,
        };

        let good = Frame::new(0x3001, 0x2001, Op::ReadResponse, vec![0x00, 0x3b, 0x02, 0x01]);
        assert!(m.matches(&good));

        let wrong_table = Frame::new(0x3001, 0x2001, Op::ReadResponse, vec![0x00, 0x3b, 0x03]);
        assert!(!m.matches(&wrong_table));

        let wrong_source = Frame::new(0x3001, 0x4001, Op::ReadResponse, vec![0x00, 0x3b, 0x02]);
        assert!(!m.matches(&wrong_source));

        let wrong_op = Frame::new(0x3001, 0x2001, Op::WriteResponse, vec![0x00, 0x3b, 0x02]);
        assert!(!m.matches(&wrong_op));
    }

    #[test]
    fn write_ack_match() {
        let m = ResponseMatch::WriteAck { source: 0x2001 };
        assert!(m.matches(&Frame::new(0x3001, 0x2001, Op::WriteResponse, vec![])));
        assert!(m.matches(&Frame::new(0x3001, 0x2001, Op::Ack, vec![])));
        assert!(!m.matches(&Frame::new(0x3001, 0x2001, Op::Nack, vec![])));
        assert!(!m.matches(&Frame::new(0x3001, 0x5001, Op::Ack, vec![])));
    }

    #[test]
    fn stats_string_format() {
        let stats = BusStats::default();
        BusStats::add(&stats.requests, 2);
        BusStats::add(&stats.crc_errors, 1);
        let s = stats.stats_string();
        assert!(s.contains("requests=2"));
        assert!(s.contains("crcErrors=1"));
    }
}
