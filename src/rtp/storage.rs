/// Per-stream RTP packet storage for FEC recovery
///
/// Keeps recently received packets of one stream, ordered by sequence number,
/// for as long as their arrival time lies within a retention window. Stored
/// packets are handed back either as a single redundant packet or as the group
/// of media + FEC packets an FEC decoder needs to rebuild a lost packet.

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::packet::{ArrivalTime, PacketRef, RtpPacket};
use super::seqnum;

/// A stored packet together with the header fields the queries look at
#[derive(Debug)]
pub struct StoredPacket<P = RtpPacket> {
    packet: PacketRef<P>,
    payload_type: u8,
    sequence: u16,
}

impl<P> StoredPacket<P> {
    fn new(packet: PacketRef<P>, payload_type: u8, sequence: u16) -> Self {
        Self {
            packet,
            payload_type,
            sequence,
        }
    }

    pub fn packet(&self) -> &PacketRef<P> {
        &self.packet
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

/// Counters for one stream buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Packets currently held
    pub stored: usize,
    /// Packets ever inserted
    pub inserted: u64,
    /// Packets dropped by the retention window
    pub evicted: u64,
}

#[derive(Debug)]
struct StreamState<P> {
    /// Oldest sequence number at the front, newest at the back
    entries: VecDeque<StoredPacket<P>>,
    /// Highest arrival time ever inserted, survives eviction
    newest_arrival_time: Option<Duration>,
    inserted: u64,
    evicted: u64,
}

impl<P> StreamState<P> {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            newest_arrival_time: None,
            inserted: 0,
            evicted: 0,
        }
    }

    /// Position right after the newest entry that is not newer than `sequence`.
    /// Scans from the newest end since packets mostly arrive in order.
    fn insertion_index(&self, sequence: u16) -> usize {
        self.entries
            .iter()
            .rposition(|e| seqnum::compare(e.sequence, sequence) >= 0)
            .map_or(0, |i| i + 1)
    }

    fn insert(&mut self, packet: PacketRef<P>, payload_type: u8, sequence: u16) {
        let index = self.insertion_index(sequence);
        self.entries
            .insert(index, StoredPacket::new(packet, payload_type, sequence));
        self.inserted += 1;
        trace!(
            "Stored packet: seq={}, pt={}, position={}, depth={}",
            sequence,
            payload_type,
            index,
            self.entries.len()
        );
    }

    fn position_of(&self, sequence: u16) -> Option<usize> {
        self.entries.iter().position(|e| e.sequence == sequence)
    }

    /// Index range of the packets needed to recover `lost_seq`
    fn recovery_range(&self, fec_payload_type: u8, lost_seq: u16) -> Option<RangeInclusive<usize>> {
        // The lost packet itself may be here: it arrived late or was already recovered
        if let Some(index) = self.position_of(lost_seq) {
            return Some(index..=index);
        }

        // Anything before the oldest entry has already left the window
        let oldest = self.entries.front()?;
        if seqnum::is_before(lost_seq, oldest.sequence) {
            return None;
        }

        // Find the first run of media packets followed by FEC packets whose
        // newest FEC packet is not older than the lost one, e.g.
        //
        //   #0 #1 #2 #3F #4F #5F #6 #8 #9F #10F
        //
        // lost 7 -> [#6 .. #10F]
        let mut start: Option<usize> = None;
        let mut saw_fec = true;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.payload_type == fec_payload_type {
                if !seqnum::is_after(lost_seq, entry.sequence) {
                    let closes_run = self
                        .entries
                        .get(i + 1)
                        .map_or(true, |next| next.payload_type != fec_payload_type);
                    if closes_run {
                        return Some(start.unwrap_or(i)..=i);
                    }
                }
                saw_fec = true;
            } else if saw_fec {
                saw_fec = false;
                start = Some(i);
            }
        }

        None
    }

    fn clear(&mut self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        released
    }
}

impl<P: ArrivalTime> StreamState<P> {
    /// Raise the high-water arrival time to cover `packet`
    fn note_arrival(&mut self, packet: &PacketRef<P>) -> bool {
        let Some(arrival) = packet.arrival_time() else {
            return false;
        };
        self.newest_arrival_time = Some(
            self.newest_arrival_time
                .map_or(arrival, |newest| newest.max(arrival)),
        );
        true
    }

    /// Drop leading entries older than `window` relative to the newest arrival.
    /// Entries without an arrival time are kept and do not stop the scan.
    fn evict_older_than(&mut self, window: Duration) -> usize {
        let Some(newest) = self.newest_arrival_time else {
            debug_assert!(false, "eviction requested before any arrival time was seen");
            warn!("Eviction requested before any arrival time was seen, ignoring");
            return 0;
        };
        if window.is_zero() {
            debug_assert!(false, "retention window must be positive");
            warn!("Zero retention window, ignoring eviction");
            return 0;
        }

        let stop = self
            .entries
            .iter()
            .position(|e| {
                e.packet
                    .arrival_time()
                    .is_some_and(|t| newest.saturating_sub(t) <= window)
            })
            .unwrap_or(self.entries.len());

        let kept: Vec<_> = self
            .entries
            .drain(..stop)
            .filter(|e| e.packet.arrival_time().is_none())
            .collect();
        let evicted = stop - kept.len();
        for entry in kept.into_iter().rev() {
            self.entries.push_front(entry);
        }

        if evicted > 0 {
            self.evicted += evicted as u64;
            debug!(
                "Evicted {} packets older than {:?}, depth={}",
                evicted,
                window,
                self.entries.len()
            );
        }
        evicted
    }
}

/// Retention buffer for one RTP stream
///
/// Every operation takes the buffer's lock for its whole duration, so a buffer
/// can be shared between the receiving context and the loss handling context.
#[derive(Debug)]
pub struct StreamBuffer<P = RtpPacket> {
    stream_id: u32,
    state: Mutex<StreamState<P>>,
}

impl<P> StreamBuffer<P> {
    pub fn new(stream_id: u32) -> Self {
        debug!("Created storage for stream {:#010x}", stream_id);
        Self {
            stream_id,
            state: Mutex::new(StreamState::new()),
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    fn lock(&self) -> MutexGuard<'_, StreamState<P>> {
        // Every mutation leaves the entries consistent, so a poisoned lock is usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Packet with exactly this sequence number, for redundant delivery
    pub fn find_exact(&self, sequence: u16) -> Option<PacketRef<P>> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.sequence == sequence)
            .map(|e| Arc::clone(&e.packet))
    }

    /// Packets an FEC decoder needs to rebuild `lost_seq`, oldest first.
    ///
    /// Returns just the lost packet if it is already stored. Otherwise returns
    /// the nearest run of media packets plus the trailing FEC packets covering
    /// `lost_seq`, or `None` when no such run is stored.
    pub fn find_recovery_group(&self, fec_payload_type: u8, lost_seq: u16) -> Option<Vec<PacketRef<P>>> {
        let state = self.lock();
        let range = state.recovery_range(fec_payload_type, lost_seq)?;
        let group: Vec<_> = state
            .entries
            .range(range)
            .map(|e| Arc::clone(&e.packet))
            .collect();
        debug!(
            "Recovery group for seq={} on stream {:#010x}: {} packets",
            lost_seq,
            self.stream_id,
            group.len()
        );
        Some(group)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn newest_arrival_time(&self) -> Option<Duration> {
        self.lock().newest_arrival_time
    }

    pub fn oldest_sequence(&self) -> Option<u16> {
        self.lock().entries.front().map(|e| e.sequence)
    }

    /// Snapshot of stored sequence numbers, oldest first
    pub fn sequence_numbers(&self) -> Vec<u16> {
        self.lock().entries.iter().map(|e| e.sequence).collect()
    }

    pub fn stats(&self) -> StreamStats {
        let state = self.lock();
        StreamStats {
            stored: state.entries.len(),
            inserted: state.inserted,
            evicted: state.evicted,
        }
    }

    /// Release every stored packet and tear the buffer down.
    /// Returns the number of packet references released.
    pub fn destroy(self) -> usize {
        let released = self.lock().clear();
        debug!(
            "Destroyed storage for stream {:#010x}, released {} packets",
            self.stream_id, released
        );
        released
    }
}

impl<P: ArrivalTime> StreamBuffer<P> {
    /// Insert a packet in sequence order without evicting anything.
    /// The newest arrival time still follows the packet's timestamp.
    pub fn insert(&self, packet: PacketRef<P>, payload_type: u8, sequence: u16) {
        let mut state = self.lock();
        state.note_arrival(&packet);
        state.insert(packet, payload_type, sequence);
    }

    /// Evict packets that fell out of `window`.
    ///
    /// Must only be called once an arrival time has been recorded and with a
    /// positive window; both are checked with debug assertions and ignored in
    /// release builds.
    pub fn evict_older_than(&self, window: Duration) -> usize {
        self.lock().evict_older_than(window)
    }

    /// Per-packet entry point: update the newest arrival time, evict, insert.
    ///
    /// A packet without an arrival time is stored without running eviction.
    pub fn resize_and_insert(&self, window: Duration, packet: PacketRef<P>, payload_type: u8, sequence: u16) {
        let mut state = self.lock();
        if state.note_arrival(&packet) {
            state.evict_older_than(window);
        }
        state.insert(packet, payload_type, sequence);
    }
}
