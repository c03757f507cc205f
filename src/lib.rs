//! critfs: a user-space filesystem that splits every file it understands
//! into two physical byte streams.
//!
//! The *critical* stream holds the bytes a file format needs to stay
//! parseable: headers, chunk framing, checksums, calibration tables. The
//! *non-critical* stream holds the bytes that can degrade without making
//! the file unreadable, which in practice means pixel and entropy data.
//! A text sidecar maps logical byte ranges onto the two streams, so the
//! user keeps seeing one ordinary file at the mount point while the
//! non-critical stream can be stored on cheaper media or deliberately
//! corrupted for resilience experiments.
//!
//! The core is a plain path-based [`Gateway`] over a backing directory;
//! [`CriticalFs`] adapts it to the kernel's inode-based FUSE protocol.

pub mod error;
pub mod fs;
pub mod gateway;
pub mod mapping;
pub mod partition;
pub mod range;
pub mod store;

pub use crate::error::CritError;
pub use crate::fs::CriticalFs;
pub use crate::gateway::Gateway;
pub use crate::mapping::MapEntry;
pub use crate::mapping::MappingTable;
pub use crate::mapping::StreamTag;
pub use crate::partition::Format;
pub use crate::range::Range;
