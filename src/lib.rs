pub mod header;
pub mod cluster;
pub mod index;
pub mod demux;

pub use header::{RcwtHeader, HeaderError, Writer, has_rcwt_extension, probe, validate};
pub use cluster::ClusterHeader;
pub use index::{Packet, PacketId, PacketQueue, PacketIndex, PacketCursor, IndexOptions, SortOrder, SeekPolicy};
pub use demux::{RcwtDemuxer, DemuxOptions, DemuxError, DemuxStats, StreamDescriptor};
