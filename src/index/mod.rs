//! Packet index — the ordered queue of demuxed caption packets.
//!
//! The index has two phases, expressed as two types:
//!
//! * [`PacketQueue`] is write-only.  The demuxer pushes one packet per
//!   non-empty cluster, in stream order, and each packet receives the next
//!   sequential [`PacketId`].
//! * [`PacketIndex`] is the read-only result of [`PacketQueue::finalize`].
//!   It is sorted for seeking and never mutated again, so it can be shared
//!   between readers.  Each reader walks it through its own [`PacketCursor`].
//!
//! `finalize` consumes the queue, so an index can only be finalized once and
//! a queue that was abandoned half-way (a parse error) can never be queried.

use serde::{Serialize, Serializer};
use std::cmp::Reverse;
use thiserror::Error;
use tracing::warn;

use crate::cluster::RCWT_BLOCK_SIZE;

/// Sequential identifier assigned at insertion, independent of content.
pub type PacketId = u64;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Out of memory growing the packet index to {requested} entries")]
    Allocation { requested: usize },
}

// ── Packet ───────────────────────────────────────────────────────────────────

/// One demuxed cluster.  The payload is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    pub id:        PacketId,
    /// Milliseconds (time base 1/1000).
    pub timestamp: i64,
    /// Byte offset in the source just past the end of this cluster.
    pub position:  u64,
    #[serde(serialize_with = "serialize_hex")]
    pub payload:   Vec<u8>,
}

impl Packet {
    pub fn block_count(&self) -> usize {
        self.payload.len() / RCWT_BLOCK_SIZE
    }

    /// The raw caption byte triplets, uninterpreted.
    pub fn blocks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.payload.chunks_exact(RCWT_BLOCK_SIZE)
    }
}

fn serialize_hex<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Order established by [`PacketQueue::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Timestamp, ties broken by source position.
    #[default]
    Timestamp,
    /// Source position, i.e. stream order.
    Position,
}

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub sort:            SortOrder,
    /// When false, a packet identical to its predecessor in the finalized
    /// order (same timestamp and payload) is dropped.
    pub keep_duplicates: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            sort:            SortOrder::Timestamp,
            keep_duplicates: true,
        }
    }
}

/// Which neighbour of a target timestamp a seek lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPolicy {
    /// Earliest packet with `timestamp >= target`.
    AtOrAfter,
    /// Latest timestamp `<= target`; the first packet carrying it.
    AtOrBefore,
}

// ── Builder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: Vec<Packet>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Append a packet.  Ownership of `payload` moves into the queue.
    pub fn insert(
        &mut self,
        payload:   Vec<u8>,
        timestamp: i64,
        position:  u64,
    ) -> Result<PacketId, IndexError> {
        let id = self.packets.len() as PacketId;
        self.packets
            .try_reserve(1)
            .map_err(|_| IndexError::Allocation { requested: self.packets.len() + 1 })?;
        self.packets.push(Packet { id, timestamp, position, payload });
        Ok(id)
    }

    /// Sort and freeze the queue.
    pub fn finalize(self, opts: &IndexOptions) -> PacketIndex {
        let mut packets = self.packets;
        // Stable sorts; ids break any remaining tie.
        match opts.sort {
            SortOrder::Timestamp => packets.sort_by_key(|p| (p.timestamp, p.position, p.id)),
            SortOrder::Position  => packets.sort_by_key(|p| (p.position, p.timestamp, p.id)),
        }

        if !opts.keep_duplicates {
            let before = packets.len();
            packets.dedup_by(|cur, prev| {
                cur.timestamp == prev.timestamp && cur.payload == prev.payload
            });
            let dropped = before - packets.len();
            if dropped > 0 {
                warn!(dropped, "dropping duplicated caption packets");
            }
        }

        PacketIndex { packets, sort: opts.sort }
    }
}

// ── Finalized index ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PacketIndex {
    packets: Vec<Packet>,
    sort:    SortOrder,
}

impl PacketIndex {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort
    }

    pub fn get(&self, i: usize) -> Option<&Packet> {
        self.packets.get(i)
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Packets in finalized order.
    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.packets.iter()
    }

    /// Packets in the order they were inserted (stream order).
    pub fn iter_stream_order(&self) -> impl Iterator<Item = &Packet> + '_ {
        let mut refs: Vec<&Packet> = self.packets.iter().collect();
        refs.sort_by_key(|p| p.id);
        refs.into_iter()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.packets.iter().map(|p| p.timestamp).min()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.packets.iter().map(|p| p.timestamp).max()
    }

    pub fn total_payload_bytes(&self) -> u64 {
        self.packets.iter().map(|p| p.payload.len() as u64).sum()
    }

    /// Find the packet a seek to `target` lands on.
    pub fn locate(&self, target: i64, policy: SeekPolicy) -> Option<usize> {
        match self.sort {
            SortOrder::Timestamp => self.locate_sorted(target, policy),
            SortOrder::Position  => self.locate_scan(target, policy),
        }
    }

    fn locate_sorted(&self, target: i64, policy: SeekPolicy) -> Option<usize> {
        match policy {
            SeekPolicy::AtOrAfter => {
                let i = self.packets.partition_point(|p| p.timestamp < target);
                (i < self.packets.len()).then_some(i)
            }
            SeekPolicy::AtOrBefore => {
                let i = self.packets.partition_point(|p| p.timestamp <= target);
                let found = self.packets.get(i.checked_sub(1)?)?.timestamp;
                Some(self.packets.partition_point(|p| p.timestamp < found))
            }
        }
    }

    fn locate_scan(&self, target: i64, policy: SeekPolicy) -> Option<usize> {
        let candidates = self.packets.iter().enumerate();
        match policy {
            SeekPolicy::AtOrAfter => candidates
                .filter(|(_, p)| p.timestamp >= target)
                .min_by_key(|(i, p)| (p.timestamp, *i))
                .map(|(i, _)| i),
            SeekPolicy::AtOrBefore => candidates
                .filter(|(_, p)| p.timestamp <= target)
                .max_by_key(|(i, p)| (p.timestamp, Reverse(*i)))
                .map(|(i, _)| i),
        }
    }

    /// Bounded seek: the packet nearest to `target` whose timestamp lies in
    /// `[min, max]`.  On equal distance the earlier packet wins.
    pub fn locate_range(&self, min: i64, target: i64, max: i64) -> Option<usize> {
        if min > target || target > max {
            return None;
        }
        let in_range = |i: &usize| (min..=max).contains(&self.packets[*i].timestamp);
        let before = self.locate(target, SeekPolicy::AtOrBefore).filter(in_range);
        let after  = self.locate(target, SeekPolicy::AtOrAfter).filter(in_range);
        match (before, after) {
            (Some(b), Some(a)) => {
                let db = target.abs_diff(self.packets[b].timestamp);
                let da = self.packets[a].timestamp.abs_diff(target);
                Some(if da < db { a } else { b })
            }
            (b, a) => b.or(a),
        }
    }

    /// BLAKE3 over every packet's timestamp and payload in finalized order.
    /// Two parses of the same bytes always produce the same digest.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for p in &self.packets {
            hasher.update(&p.timestamp.to_le_bytes());
            hasher.update(&(p.payload.len() as u64).to_le_bytes());
            hasher.update(&p.payload);
        }
        hasher.finalize().into()
    }

    pub fn cursor(&self) -> PacketCursor<'_> {
        PacketCursor { index: self, next: 0 }
    }
}

// ── Cursor ───────────────────────────────────────────────────────────────────

/// Sequential reader over a [`PacketIndex`].
#[derive(Debug, Clone)]
pub struct PacketCursor<'a> {
    index: &'a PacketIndex,
    next:  usize,
}

impl<'a> PacketCursor<'a> {
    /// Position of the packet the next [`read_next`](Self::read_next) returns.
    pub fn position(&self) -> usize {
        self.next
    }

    pub fn read_next(&mut self) -> Option<&'a Packet> {
        let p = self.index.get(self.next)?;
        self.next += 1;
        Some(p)
    }

    pub fn rewind(&mut self) {
        self.next = 0;
    }

    /// Reposition on the packet `locate` finds and return it without
    /// consuming it.  A miss leaves the cursor where it was.
    pub fn seek(&mut self, target: i64, policy: SeekPolicy) -> Option<&'a Packet> {
        let i = self.index.locate(target, policy)?;
        self.next = i;
        self.index.get(i)
    }

    pub fn seek_range(&mut self, min: i64, target: i64, max: i64) -> Option<&'a Packet> {
        let i = self.index.locate_range(min, target, max)?;
        self.next = i;
        self.index.get(i)
    }
}

impl<'a> Iterator for PacketCursor<'a> {
    type Item = &'a Packet;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next()
    }
}
