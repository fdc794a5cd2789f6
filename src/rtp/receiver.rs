use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::packet::{PacketRef, RtpPacket};
use super::seqnum;
use super::storage::{StreamBuffer, StreamStats};
use crate::config::Config;

/// Shortest period between periodic stats logs
const MIN_STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Packets handed to the FEC decoder to rebuild one lost packet
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub lost_seq: u16,
    /// Oldest first
    pub packets: Vec<PacketRef>,
}

/// Receiver behaviour, taken from [`Config`]
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    /// Retention window; zero disables storage
    pub size_time: Duration,
    pub fec_payload_type: u8,
    pub max_pending_losses: usize,
    pub stats_interval: Duration,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            size_time: Duration::ZERO,
            fec_payload_type: 100,
            max_pending_losses: 64,
            stats_interval: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for ReceiverSettings {
    fn from(config: &Config) -> Self {
        Self {
            size_time: config.size_time,
            fec_payload_type: config.fec_payload_type,
            max_pending_losses: config.max_pending_losses,
            stats_interval: Duration::from_secs(config.stats_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub packets_received: u64,
    /// Not parseable as RTP
    pub packets_invalid: u64,
    /// From an SSRC other than the one we latched onto
    pub packets_foreign: u64,
    /// Late copies of packets already in storage
    pub packets_redundant: u64,
    pub losses_detected: u64,
    pub recoveries_requested: u64,
    /// Pending losses given up on (window passed or too many pending)
    pub losses_abandoned: u64,
    pub storage: StreamStats,
}

/// Tracks sequence gaps that might still be recovered
#[derive(Debug)]
pub struct LossTracker {
    highest: Option<u16>,
    pending: VecDeque<u16>,
    max_pending: usize,
}

impl LossTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            highest: None,
            pending: VecDeque::new(),
            max_pending,
        }
    }

    /// Whether `seq` is not newer than anything seen so far
    pub fn is_late(&self, seq: u16) -> bool {
        self.highest.is_some_and(|h| !seqnum::is_after(seq, h))
    }

    /// Record an arrival. Returns (losses detected, losses dropped for lack of room).
    pub fn observe(&mut self, seq: u16) -> (u64, u64) {
        let Some(highest) = self.highest else {
            self.highest = Some(seq);
            return (0, 0);
        };

        if !seqnum::is_after(seq, highest) {
            // Late arrival: no longer lost
            if let Some(pos) = self.pending.iter().position(|&s| s == seq) {
                self.pending.remove(pos);
                debug!("Lost packet arrived late: seq={}", seq);
            }
            return (0, 0);
        }

        self.highest = Some(seq);
        let missing = seqnum::compare(highest, seq) as u16 - 1;
        if missing == 0 {
            return (0, 0);
        }

        // Skip what would be pushed out again straight away
        let skip = (missing as usize).saturating_sub(self.max_pending);
        let mut dropped = skip as u64;
        for offset in (skip as u16 + 1)..=missing {
            if self.pending.len() >= self.max_pending {
                self.pending.pop_front();
                dropped += 1;
            }
            self.pending.push_back(highest.wrapping_add(offset));
        }
        debug!(
            "Detected {} lost packets before seq={}, pending={}",
            missing,
            seq,
            self.pending.len()
        );
        (missing as u64, dropped)
    }

    /// Pending losses, oldest first
    pub fn pending(&self) -> impl Iterator<Item = u16> + '_ {
        self.pending.iter().copied()
    }

    /// Forget pending losses older than `oldest`. Returns how many were dropped.
    pub fn abandon_before(&mut self, oldest: u16) -> u64 {
        let before = self.pending.len();
        self.pending.retain(|&s| !seqnum::is_before(s, oldest));
        (before - self.pending.len()) as u64
    }

    pub fn resolve(&mut self, seq: u16) {
        self.pending.retain(|&s| s != seq);
    }
}

/// Receives one RTP stream and keeps it in a [`StreamBuffer`] for FEC recovery
pub struct StorageReceiver {
    socket: UdpSocket,
    settings: ReceiverSettings,
    storage: Option<Arc<StreamBuffer>>,
    losses: LossTracker,
    recovery_tx: mpsc::Sender<RecoveryRequest>,
    started: Instant,
    stats: ReceiverStats,
}

impl StorageReceiver {
    /// Bind to a specific port (or 0 for auto-assign)
    pub async fn bind(
        port: u16,
        settings: ReceiverSettings,
        recovery_tx: mpsc::Sender<RecoveryRequest>,
    ) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", port);
        let socket = UdpSocket::bind(&addr)
            .await
            .context(format!("Failed to bind RTP socket on {}", addr))?;

        debug!("RTP receiver bound to port {}", port);

        Ok(Self::from_socket(socket, settings, recovery_tx))
    }

    /// Create from an already-bound socket
    pub fn from_socket(
        socket: UdpSocket,
        mut settings: ReceiverSettings,
        recovery_tx: mpsc::Sender<RecoveryRequest>,
    ) -> Self {
        if settings.stats_interval < MIN_STATS_INTERVAL {
            warn!(
                "Stats interval {:?} too short, using {:?}",
                settings.stats_interval, MIN_STATS_INTERVAL
            );
            settings.stats_interval = MIN_STATS_INTERVAL;
        }
        if settings.size_time.is_zero() {
            info!("Retention window is 0, packets will not be stored");
        }
        let losses = LossTracker::new(settings.max_pending_losses);
        Self {
            socket,
            settings,
            storage: None,
            losses,
            recovery_tx,
            started: Instant::now(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Storage of the latched stream, once the first packet has arrived
    pub fn storage(&self) -> Option<Arc<StreamBuffer>> {
        self.storage.clone()
    }

    pub fn stats(&self) -> ReceiverStats {
        let mut stats = self.stats.clone();
        if let Some(storage) = &self.storage {
            stats.storage = storage.stats();
        }
        stats
    }

    /// Receive until cancelled, then tear the storage down
    pub async fn run(&mut self, cancel_token: CancellationToken) -> Result<ReceiverStats> {
        let mut buf = [0u8; 2048];
        let mut stats_tick = tokio::time::interval(self.settings.stats_interval);
        stats_tick.tick().await;
        let mut first_packet_logged = false;

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            if !first_packet_logged {
                                info!("First RTP packet received: {} bytes from {}", len, addr);
                                first_packet_logged = true;
                            }
                            let arrival = self.started.elapsed();
                            self.process_datagram(&buf[..len], arrival);
                        }
                        Err(e) => {
                            warn!("RTP receive error: {}", e);
                        }
                    }
                }
                _ = stats_tick.tick() => {
                    let stats = self.stats();
                    info!(
                        "Storage: {} stored, {} received, {} losses, {} recoveries, {} redundant",
                        stats.storage.stored,
                        stats.packets_received,
                        stats.losses_detected,
                        stats.recoveries_requested,
                        stats.packets_redundant
                    );
                }
                _ = cancel_token.cancelled() => {
                    debug!("RTP receive cancelled by shutdown signal");
                    break;
                }
            }
        }

        let stats = self.stats();
        info!(
            "RTP receive done: {} packets received, {} recovery requests",
            stats.packets_received, stats.recoveries_requested
        );
        if let Some(storage) = self.storage.take() {
            match Arc::try_unwrap(storage) {
                Ok(storage) => {
                    storage.destroy();
                }
                Err(_) => debug!("Storage still shared, leaving teardown to its last owner"),
            }
        }
        Ok(stats)
    }

    /// Handle one datagram that arrived `arrival` after the receiver started
    pub fn process_datagram(&mut self, data: &[u8], arrival: Duration) {
        self.stats.packets_received += 1;

        let packet = match RtpPacket::parse(data, Some(arrival)) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("Ignoring datagram: {}", e);
                self.stats.packets_invalid += 1;
                return;
            }
        };

        let storage = self.storage.get_or_insert_with(|| {
            info!("Storing RTP stream ssrc={:#010x}", packet.ssrc);
            Arc::new(StreamBuffer::new(packet.ssrc))
        });
        if storage.stream_id() != packet.ssrc {
            trace!("Ignoring packet from foreign ssrc={:#010x}", packet.ssrc);
            self.stats.packets_foreign += 1;
            return;
        }
        let storage = storage.clone();

        let seq = packet.sequence;
        let payload_type = packet.payload_type;

        if self.losses.is_late(seq) && storage.find_exact(seq).is_some() {
            trace!("Redundant packet: seq={}", seq);
            self.stats.packets_redundant += 1;
            return;
        }

        let (detected, dropped) = self.losses.observe(seq);
        self.stats.losses_detected += detected;
        self.stats.losses_abandoned += dropped;

        if self.settings.size_time.is_zero() {
            return;
        }
        storage.resize_and_insert(self.settings.size_time, Arc::new(packet), payload_type, seq);

        if payload_type == self.settings.fec_payload_type {
            self.try_recover(&storage);
        }
    }

    /// Retry every pending loss against the current storage
    fn try_recover(&mut self, storage: &StreamBuffer) {
        if let Some(oldest) = storage.oldest_sequence() {
            let abandoned = self.losses.abandon_before(oldest);
            if abandoned > 0 {
                debug!("Abandoned {} losses older than seq={}", abandoned, oldest);
                self.stats.losses_abandoned += abandoned;
            }
        }

        let pending: Vec<u16> = self.losses.pending().collect();
        for lost_seq in pending {
            let Some(packets) = storage.find_recovery_group(self.settings.fec_payload_type, lost_seq) else {
                continue;
            };
            self.losses.resolve(lost_seq);
            match self.recovery_tx.try_send(RecoveryRequest { lost_seq, packets }) {
                Ok(()) => self.stats.recoveries_requested += 1,
                Err(e) => warn!("Dropping recovery request for seq={}: {}", lost_seq, e),
            }
        }
    }
}
