//! Format-aware partitioners.
//!
//! Each partitioner consumes an entire logical buffer and produces a fresh
//! [`MappingTable`] assigning every byte range to the critical or the
//! non-critical stream. Formats are selected purely by the logical path's
//! final extension; a path with no registered extension is not a partitioned
//! file and bypasses the splitting machinery entirely.

mod bmp;
mod jpeg;
mod png;
mod raw;
mod text;
mod tiff;

use std::path::Path;

use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;

/// A supported file format with its partitioning rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Tiff,
    Png,
    Jpeg,
    Bmp,
    Raw,
}

impl Format {
    /// Select a partitioner by the path's final extension, lowercased.
    pub fn for_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Format::Text),
            "dng" | "tif" | "tiff" => Some(Format::Tiff),
            "png" => Some(Format::Png),
            "jpg" | "jpeg" => Some(Format::Jpeg),
            "bmp" => Some(Format::Bmp),
            "raw" | "nef" | "cr2" | "arw" => Some(Format::Raw),
            _ => None,
        }
    }

    /// Build a mapping table for a full logical buffer.
    ///
    /// An empty buffer always yields an empty table; a buffer the format
    /// rules reject yields [`CritError::InvalidArg`](crate::CritError).
    pub fn partition(self, buf: &[u8]) -> Result<MappingTable> {
        if buf.is_empty() {
            return Ok(MappingTable::new());
        }
        match self {
            Format::Text => text::partition(buf),
            Format::Tiff => tiff::partition(buf),
            Format::Png => png::partition(buf),
            Format::Jpeg => jpeg::partition(buf),
            Format::Bmp => bmp::partition(buf),
            Format::Raw => raw::partition(buf),
        }
    }
}

/// Cursor triple shared by the sequential partitioner walks: the next
/// unmapped logical offset plus the next free offset in each physical
/// stream. `emit` keeps all three consistent so the stream-contiguity
/// invariant holds by construction.
struct Splitter {
    table: MappingTable,
    orig: u64,
    crit: u64,
    noncrit: u64,
}

impl Splitter {
    fn new() -> Splitter {
        Splitter {
            table: MappingTable::new(),
            orig: 0,
            crit: 0,
            noncrit: 0,
        }
    }

    /// Map the next `len` logical bytes into the stream named by `tag`.
    fn emit(&mut self, len: u64, tag: StreamTag) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let cursor = match tag {
            StreamTag::Critical => &mut self.crit,
            StreamTag::NonCritical => &mut self.noncrit,
        };
        self.table
            .insert(self.orig, self.orig + len - 1, *cursor, *cursor + len - 1, tag)?;
        self.orig += len;
        *cursor += len;
        Ok(())
    }

    fn finish(self) -> MappingTable {
        self.table
    }
}
