//! The partitioned-interval index: an ordered set of entries translating
//! logical byte ranges to offsets in one of the two physical streams.
//!
//! The table is persisted as a line-oriented text sidecar, one entry per
//! line: `<origLo>-<origHi> <mapLo>-<mapHi> <TAG>`. The format carries no
//! header and no version field; sidecars already on disk must keep loading,
//! so the serialisation below is byte-exact and must stay that way.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use crate::error::CritError;
use crate::error::Result;
use crate::range::Range;
use crate::store::replace_atomic;

/// Which physical stream a mapped slice lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    Critical,
    NonCritical,
}

impl StreamTag {
    fn parse(token: &str) -> Option<StreamTag> {
        match token {
            "CRITICAL_DATA" => Some(StreamTag::Critical),
            "NON_CRITICAL_DATA" => Some(StreamTag::NonCritical),
            _ => None,
        }
    }
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTag::Critical => f.write_str("CRITICAL_DATA"),
            StreamTag::NonCritical => f.write_str("NON_CRITICAL_DATA"),
        }
    }
}

/// One translation: `logical` bytes of the file live at `physical` within
/// the stream selected by `tag`. Both ranges always have equal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub logical: Range,
    pub physical: Range,
    pub tag: StreamTag,
}

/// Ordered collection of [`MapEntry`] keyed by the logical range.
///
/// Logical ranges are pairwise disjoint; `insert` rejects any conflict.
/// Iteration is always in ascending logical order regardless of insertion
/// order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MappingTable {
    entries: BTreeMap<u64, MapEntry>,
}

impl MappingTable {
    pub fn new() -> MappingTable {
        MappingTable::default()
    }

    /// Add an entry mapping `[orig_lo, orig_hi]` to `[map_lo, map_hi]` in
    /// the stream named by `tag`. Fails if the bounds are inverted, the two
    /// ranges differ in length, or the logical range conflicts with an
    /// existing entry.
    pub fn insert(
        &mut self,
        orig_lo: u64,
        orig_hi: u64,
        map_lo: u64,
        map_hi: u64,
        tag: StreamTag,
    ) -> Result<()> {
        let logical = Range::new(orig_lo, orig_hi)?;
        let physical = Range::new(map_lo, map_hi)?;
        if logical.len() != physical.len() {
            return Err(CritError::InvalidArg(format!(
                "mapping lengths differ: {logical} vs {physical}"
            )));
        }
        // The nearest entry at or below `hi` is the only candidate overlap.
        if let Some((_, prior)) = self.entries.range(..=logical.hi()).next_back() {
            if prior.logical.overlaps(&logical) {
                return Err(CritError::InvalidArg(format!(
                    "logical range {logical} conflicts with existing {}",
                    prior.logical
                )));
            }
        }
        self.entries.insert(
            logical.lo(),
            MapEntry {
                logical,
                physical,
                tag,
            },
        );
        Ok(())
    }

    /// Swap the entire contents for `table`'s.
    pub fn replace(&mut self, table: MappingTable) {
        self.entries = table.entries;
    }

    /// Entries in ascending logical order.
    pub fn iter(&self) -> impl Iterator<Item = &MapEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One past the highest mapped logical offset; the logical file size.
    pub fn logical_size(&self) -> u64 {
        match self.entries.values().next_back() {
            Some(entry) => entry.logical.hi() + 1,
            None => 0,
        }
    }

    /// Parse a sidecar. Any unparseable line, and any line whose ranges
    /// conflict with an earlier one, fails the whole load.
    pub fn load(path: &Path) -> Result<MappingTable> {
        let file = File::open(path)?;
        let mut table = MappingTable::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let (orig, map, tag) = parse_line(&line)
                .ok_or_else(|| CritError::MappingMalformed(format!("bad line {line:?}")))?;
            table
                .insert(orig.0, orig.1, map.0, map.1, tag)
                .map_err(|err| CritError::MappingMalformed(format!("line {line:?}: {err}")))?;
        }
        Ok(table)
    }

    /// Serialise all entries in ascending logical order, replacing `path`
    /// via a temporary sibling and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for entry in self.iter() {
            out.push_str(&format!(
                "{} {} {}\n",
                entry.logical, entry.physical, entry.tag
            ));
        }
        replace_atomic(path, out.as_bytes())?;
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<((u64, u64), (u64, u64), StreamTag)> {
    let mut fields = line.split_whitespace();
    let orig = parse_range(fields.next()?)?;
    let map = parse_range(fields.next()?)?;
    let tag = StreamTag::parse(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }
    Some((orig, map, tag))
}

fn parse_range(field: &str) -> Option<(u64, u64)> {
    let (lo, hi) = field.split_once('-')?;
    Some((lo.parse().ok()?, hi.parse().ok()?))
}
