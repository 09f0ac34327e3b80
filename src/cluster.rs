use byteorder::{ByteOrder, LittleEndian};

/// Timestamp (8) + block count (2).
pub const CLUSTER_HEADER_SIZE:     usize = 10;
/// Size of one raw caption byte triplet.
pub const RCWT_BLOCK_SIZE:         usize = 3;
pub const RCWT_CLUSTER_MAX_BLOCKS: usize = u16::MAX as usize;

/// Fixed prefix of every cluster.  All fields are little-endian, unlike the
/// file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterHeader {
    /// Milliseconds in the stream's own time base.  Not range-checked and
    /// not required to be monotonic.
    pub timestamp:   i64,
    pub block_count: u16,
}

impl ClusterHeader {
    pub fn parse(buf: &[u8; CLUSTER_HEADER_SIZE]) -> Self {
        Self {
            timestamp:   LittleEndian::read_i64(&buf[0..8]),
            block_count: LittleEndian::read_u16(&buf[8..10]),
        }
    }

    /// Number of payload bytes that follow this header.
    pub fn payload_size(&self) -> usize {
        self.block_count as usize * RCWT_BLOCK_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }
}
