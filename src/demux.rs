//! Stream-to-packet demultiplexer.
//!
//! # Parse
//! [`RcwtDemuxer::from_reader`] validates the 11-byte header, declares the
//! single caption stream, then drains the input cluster by cluster:
//!
//! ```text
//! [i64 LE timestamp][u16 LE block_count][block_count * 3 bytes payload]
//! ```
//!
//! Each non-empty cluster becomes one [`Packet`] in a [`PacketQueue`].
//! Clusters with zero blocks are skipped together with their timestamp.
//! End of stream is only clean when it falls exactly on a cluster boundary.
//!
//! # Failure
//! Parsing is fail-closed.  Any error drops the queue with everything
//! already inserted, and no demuxer is returned.  A damaged file never
//! yields a queryable partial index.
//!
//! # Offsets
//! Offsets in errors and [`Packet::position`] count bytes from the first
//! header byte, whatever the reader's own position was when handed over.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::cluster::{ClusterHeader, CLUSTER_HEADER_SIZE};
use crate::header::{HeaderError, RcwtHeader, RCWT_HEADER_SIZE};
use crate::index::{IndexError, IndexOptions, Packet, PacketIndex, PacketQueue, SeekPolicy};

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("Input cluster has invalid size (expected={expected} actual={actual} pos={offset})")]
    TruncatedCluster { expected: usize, actual: usize, offset: u64 },
    #[error("Input ends inside a cluster header ({actual} of 10 bytes, pos={offset})")]
    TruncatedClusterHeader { actual: usize, offset: u64 },
    #[error("Out of memory allocating {requested} bytes of cluster payload")]
    Allocation { requested: usize },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DemuxError {
    /// See [`HeaderError::is_format_mismatch`].
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, DemuxError::Header(e) if e.is_format_mismatch())
    }
}

// ── Stream descriptor ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaType {
    Subtitle,
}

/// Payload carried by the stream.  RCWT triplets are CEA-608/708 `cc_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptionCodec {
    Eia608,
}

/// The one logical output stream of an RCWT file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDescriptor {
    pub index:      usize,
    pub media_type: MediaType,
    pub codec:      CaptionCodec,
    /// Seconds per tick as `(numerator, denominator)`.
    pub time_base:  (u32, u32),
    /// Timestamps may jump or go backwards between packets.
    pub discontinuous_timestamps: bool,
}

impl StreamDescriptor {
    pub fn rcwt() -> Self {
        Self {
            index:      0,
            media_type: MediaType::Subtitle,
            codec:      CaptionCodec::Eia608,
            time_base:  (1, 1000),
            discontinuous_timestamps: true,
        }
    }

    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.time_base.0 as f64 / self.time_base.1 as f64
    }
}

// ── Options / stats ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DemuxOptions {
    pub index: IndexOptions,
}

/// Counters gathered while draining the clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DemuxStats {
    pub clusters:       u64,
    pub empty_clusters: u64,
    pub packets:        u64,
    pub payload_bytes:  u64,
    /// Total bytes consumed, header included.
    pub bytes_read:     u64,
}

// ── Cluster loop ─────────────────────────────────────────────────────────────

/// Read up to `len` bytes, stopping early only at end of stream.
fn read_up_to<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, DemuxError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| DemuxError::Allocation { requested: len })?;
    reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Drain every cluster from `reader` into `queue`.
///
/// `offset` is the stream offset of the first cluster (normally
/// [`RCWT_HEADER_SIZE`]).  On error the packets already in `queue` stay
/// there; it is up to the caller to discard them.
pub fn demux_clusters<R: Read>(
    reader: &mut R,
    offset: u64,
    queue:  &mut PacketQueue,
) -> Result<DemuxStats, DemuxError> {
    let mut stats = DemuxStats { bytes_read: offset, ..Default::default() };

    loop {
        let raw = read_up_to(reader, CLUSTER_HEADER_SIZE)?;
        stats.bytes_read += raw.len() as u64;
        match raw.len() {
            0 => break,
            CLUSTER_HEADER_SIZE => {}
            actual => {
                error!(actual, pos = stats.bytes_read, "Input ends inside a cluster header");
                return Err(DemuxError::TruncatedClusterHeader { actual, offset: stats.bytes_read });
            }
        }
        let mut fixed = [0u8; CLUSTER_HEADER_SIZE];
        fixed.copy_from_slice(&raw);
        let cluster = ClusterHeader::parse(&fixed);
        stats.clusters += 1;

        if cluster.is_empty() {
            stats.empty_clusters += 1;
            continue;
        }

        let expected = cluster.payload_size();
        let payload  = read_up_to(reader, expected)?;
        stats.bytes_read += payload.len() as u64;
        if payload.len() != expected {
            error!(
                expected,
                actual = payload.len(),
                pos = stats.bytes_read,
                "Input cluster has invalid size"
            );
            return Err(DemuxError::TruncatedCluster {
                expected,
                actual: payload.len(),
                offset: stats.bytes_read,
            });
        }

        stats.payload_bytes += payload.len() as u64;
        let id = queue.insert(payload, cluster.timestamp, stats.bytes_read)?;
        stats.packets += 1;
        debug!(id, pts = cluster.timestamp, blocks = cluster.block_count, pos = stats.bytes_read, "packet");
    }

    Ok(stats)
}

// ── Session ──────────────────────────────────────────────────────────────────

/// A successfully parsed RCWT stream.
///
/// Holds the finalized packet index plus a cursor position for the
/// sequential [`read_packet`](Self::read_packet) / [`seek`](Self::seek)
/// API.  For concurrent readers, share [`index`](Self::index) and give each
/// reader its own [`PacketIndex::cursor`].
#[derive(Debug)]
pub struct RcwtDemuxer {
    header: RcwtHeader,
    stream: StreamDescriptor,
    stats:  DemuxStats,
    index:  PacketIndex,
    next:   usize,
}

impl RcwtDemuxer {
    pub fn open<P: AsRef<Path>>(path: P, opts: DemuxOptions) -> Result<Self, DemuxError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file), opts)
    }

    pub fn from_reader<R: Read>(mut reader: R, opts: DemuxOptions) -> Result<Self, DemuxError> {
        let header = RcwtHeader::read(&mut reader)?;
        let stream = StreamDescriptor::rcwt();

        let mut queue = PacketQueue::new();
        let stats = demux_clusters(&mut reader, RCWT_HEADER_SIZE as u64, &mut queue)?;
        let index = queue.finalize(&opts.index);

        info!(
            writer = header.writer.name(),
            clusters = stats.clusters,
            packets = index.len(),
            bytes = stats.bytes_read,
            "RCWT stream demuxed"
        );

        Ok(Self { header, stream, stats, index, next: 0 })
    }

    pub fn header(&self) -> &RcwtHeader {
        &self.header
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    pub fn stats(&self) -> &DemuxStats {
        &self.stats
    }

    pub fn index(&self) -> &PacketIndex {
        &self.index
    }

    pub fn into_index(self) -> PacketIndex {
        self.index
    }

    /// Next packet in finalized order, or `None` at the end.
    pub fn read_packet(&mut self) -> Option<&Packet> {
        let p = self.index.get(self.next)?;
        self.next += 1;
        Some(p)
    }

    /// Position the session on the packet chosen by `policy`; the next
    /// [`read_packet`](Self::read_packet) returns it.
    pub fn seek(&mut self, target: i64, policy: SeekPolicy) -> Option<&Packet> {
        self.next = self.index.locate(target, policy)?;
        self.index.get(self.next)
    }

    pub fn seek_range(&mut self, min: i64, target: i64, max: i64) -> Option<&Packet> {
        self.next = self.index.locate_range(min, target, max)?;
        self.index.get(self.next)
    }

    pub fn rewind(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: [u8; 11] = [0xCC, 0xCC, 0xED, 0xCC, 0x00, 0x50, 0x00, 0x01, 0x00, 0x00, 0x00];

    fn cluster(ts: i64, payload: &[u8]) -> Vec<u8> {
        let mut out = ts.to_le_bytes().to_vec();
        out.extend_from_slice(&((payload.len() / 3) as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn loop_counts_and_positions() {
        let mut data = cluster(10, &[1, 2, 3]);
        data.extend(cluster(20, &[]));
        data.extend(cluster(30, &[4, 5, 6, 7, 8, 9]));

        let mut q = PacketQueue::new();
        let stats = demux_clusters(&mut Cursor::new(&data), 11, &mut q).unwrap();
        assert_eq!(stats.clusters, 3);
        assert_eq!(stats.empty_clusters, 1);
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.payload_bytes, 9);
        assert_eq!(stats.bytes_read, 11 + data.len() as u64);

        let idx = q.finalize(&IndexOptions::default());
        assert_eq!(idx.get(0).unwrap().position, 11 + 13);
        assert_eq!(idx.get(1).unwrap().position, 11 + data.len() as u64);
    }

    #[test]
    fn truncated_payload_keeps_earlier_packets_in_queue() {
        let mut data = cluster(10, &[1, 2, 3]);
        data.extend_from_slice(&20i64.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&[0xAA; 5]);

        let mut q = PacketQueue::new();
        let err = demux_clusters(&mut Cursor::new(&data), 11, &mut q).unwrap_err();
        match err {
            DemuxError::TruncatedCluster { expected, actual, offset } => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 5);
                assert_eq!(offset, 11 + data.len() as u64);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn partial_cluster_header() {
        let mut data = cluster(10, &[1, 2, 3]);
        data.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        let mut q = PacketQueue::new();
        let err = demux_clusters(&mut Cursor::new(&data), 11, &mut q).unwrap_err();
        assert!(matches!(
            err,
            DemuxError::TruncatedClusterHeader { actual: 4, offset } if offset == 11 + data.len() as u64
        ));
    }

    #[test]
    fn session_read_and_seek() {
        let mut data = HEADER.to_vec();
        for ts in [100i64, 50, 200] {
            data.extend(cluster(ts, &[ts as u8, 0, 0]));
        }
        let mut demux = RcwtDemuxer::from_reader(Cursor::new(data), DemuxOptions::default()).unwrap();
        assert_eq!(demux.stream().time_base, (1, 1000));
        assert_eq!(demux.read_packet().map(|p| p.timestamp), Some(50));

        assert_eq!(demux.seek(75, SeekPolicy::AtOrAfter).map(|p| p.timestamp), Some(100));
        assert_eq!(demux.read_packet().map(|p| p.timestamp), Some(100));
        assert_eq!(demux.read_packet().map(|p| p.timestamp), Some(200));
        assert!(demux.read_packet().is_none());

        assert_eq!(demux.seek_range(55, 60, 80).map(|p| p.timestamp), None);
        assert_eq!(demux.seek_range(0, 60, 1000).map(|p| p.timestamp), Some(50));
        demux.rewind();
        assert_eq!(demux.read_packet().map(|p| p.id), Some(1));
    }

    #[test]
    fn header_error_is_wrapped() {
        let err = RcwtDemuxer::from_reader(Cursor::new(vec![0xCC, 0xCC]), DemuxOptions::default())
            .unwrap_err();
        assert!(err.is_format_mismatch());
    }

    #[test]
    fn ticks_to_seconds() {
        assert_eq!(StreamDescriptor::rcwt().ticks_to_seconds(1500), 1.5);
    }
}
