//! Artefact storage for partitioned files.
//!
//! A logical file is realised by three backing artefacts next to each other:
//! the `.mapping` sidecar (whose presence is the sole signal that the file
//! is partitioned), the `.crit` stream and the `.noncrit` stream. Reads
//! gather from the two streams through the mapping; every write reconstructs
//! the full logical buffer, patches it, repartitions, and replaces all three
//! artefacts. Each artefact is replaced through a `.tmp` sibling and a
//! rename so a reader never sees a torn file, but there is no atomicity
//! across artefacts.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io;
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::CritError;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::mapping::StreamTag;
use crate::partition::Format;

pub const MAPPING_SUFFIX: &str = ".mapping";
pub const CRIT_SUFFIX: &str = ".crit";
pub const NONCRIT_SUFFIX: &str = ".noncrit";
pub const TMP_SUFFIX: &str = ".tmp";

/// The backing paths realising one logical file.
#[derive(Debug, Clone)]
pub struct Artefacts {
    base: PathBuf,
    mapping: PathBuf,
    crit: PathBuf,
    noncrit: PathBuf,
}

impl Artefacts {
    /// Derive the artefact paths for a logical file whose plain backing
    /// path would be `base`.
    pub fn at(base: &Path) -> Artefacts {
        Artefacts {
            base: base.to_path_buf(),
            mapping: append_suffix(base, MAPPING_SUFFIX),
            crit: append_suffix(base, CRIT_SUFFIX),
            noncrit: append_suffix(base, NONCRIT_SUFFIX),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn mapping(&self) -> &Path {
        &self.mapping
    }

    pub fn crit(&self) -> &Path {
        &self.crit
    }

    pub fn noncrit(&self) -> &Path {
        &self.noncrit
    }

    /// Whether the logical file exists as a partitioned file.
    pub fn mapping_exists(&self) -> bool {
        self.mapping.is_file()
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Replace `path` by writing a `.tmp` sibling and renaming it into place.
pub(crate) fn replace_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = append_suffix(path, TMP_SUFFIX);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    fs::rename(&tmp, path)
}

/// Advisory per-path locks serialising the merge-repartition pipeline.
/// Without one, two writers on the same logical file interleave their
/// reconstruct/repartition sequences and the last writer wins. Readers do
/// not take these.
#[derive(Debug, Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> PathLocks {
        PathLocks::default()
    }

    fn acquire(&self, path: &Path) -> Arc<Mutex<()>> {
        self.inner
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }
}

/// A stream file opened on first use. A read of a freshly created logical
/// file has an empty mapping and must not fail just because the streams do
/// not exist yet.
struct StreamReader {
    path: PathBuf,
    file: Option<File>,
}

impl StreamReader {
    fn new(path: &Path) -> StreamReader {
        StreamReader {
            path: path.to_path_buf(),
            file: None,
        }
    }

    fn read_exact_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.path)?,
        };
        file.read_exact_at(buf, offset)?;
        self.file = Some(file);
        Ok(())
    }
}

/// Gather `size` logical bytes starting at `offset` from the two streams.
///
/// The buffer is zero-filled up front and always comes back `size` bytes
/// long: offsets past the logical end of file, and offsets inside the
/// window that no mapping entry covers, simply stay zero. Only the
/// TIFF/DNG partitioner produces interior holes.
pub fn read(art: &Artefacts, offset: u64, size: usize) -> Result<Vec<u8>> {
    let table = MappingTable::load(art.mapping())?;
    let mut buf = vec![0u8; size];
    if size == 0 {
        return Ok(buf);
    }
    let window_hi = offset + size as u64 - 1;

    let mut crit = StreamReader::new(art.crit());
    let mut noncrit = StreamReader::new(art.noncrit());

    for entry in table.iter() {
        if entry.logical.hi() < offset || entry.logical.lo() > window_hi {
            continue;
        }
        let overlap_lo = offset.max(entry.logical.lo());
        let overlap_hi = window_hi.min(entry.logical.hi());
        let bytes = (overlap_hi - overlap_lo + 1) as usize;
        let buf_off = (overlap_lo - offset) as usize;
        let phys_off = entry.physical.lo() + (overlap_lo - entry.logical.lo());
        let reader = match entry.tag {
            StreamTag::Critical => &mut crit,
            StreamTag::NonCritical => &mut noncrit,
        };
        reader.read_exact_at(&mut buf[buf_off..buf_off + bytes], phys_off)?;
    }
    Ok(buf)
}

/// The merge-repartition pipeline: reconstruct the current logical content,
/// patch `data` in at `offset`, split the result afresh, and replace all
/// three artefacts.
pub fn write(
    art: &Artefacts,
    format: Format,
    locks: &PathLocks,
    data: &[u8],
    offset: u64,
) -> Result<()> {
    let lock = locks.acquire(art.base());
    let _guard = lock.lock();

    let current_size = if art.mapping_exists() {
        MappingTable::load(art.mapping())?.logical_size()
    } else {
        0
    };
    let end = offset + data.len() as u64;
    let mut recon = vec![0u8; current_size.max(end) as usize];
    if current_size > 0 {
        let prefix = read(art, 0, current_size as usize)?;
        recon[..prefix.len()].copy_from_slice(&prefix);
    }
    recon[offset as usize..end as usize].copy_from_slice(data);
    debug!(
        "repartitioning {:?}: {} bytes at {offset}, {} total",
        art.base(),
        data.len(),
        recon.len()
    );
    repartition(art, format, &recon)
}

/// Resize the logical file, zero-extending or clipping the reconstruction,
/// then repartition as a write would.
pub fn truncate(art: &Artefacts, format: Format, locks: &PathLocks, new_size: u64) -> Result<()> {
    let lock = locks.acquire(art.base());
    let _guard = lock.lock();

    let current_size = if art.mapping_exists() {
        MappingTable::load(art.mapping())?.logical_size()
    } else {
        0
    };
    let keep = current_size.min(new_size) as usize;
    let mut recon = vec![0u8; new_size as usize];
    if keep > 0 {
        let prefix = read(art, 0, keep)?;
        recon[..prefix.len()].copy_from_slice(&prefix);
    }
    repartition(art, format, &recon)
}

fn repartition(art: &Artefacts, format: Format, recon: &[u8]) -> Result<()> {
    let table = format.partition(recon)?;

    let mut crit = Vec::new();
    let mut noncrit = Vec::new();
    for entry in table.iter() {
        let slice = &recon[entry.logical.lo() as usize..=entry.logical.hi() as usize];
        let stream = match entry.tag {
            StreamTag::Critical => &mut crit,
            StreamTag::NonCritical => &mut noncrit,
        };
        // Walking in logical order, each entry must land exactly at the end
        // of its stream; anything else means the partitioner violated the
        // contiguous-prefix invariant.
        if entry.physical.lo() != stream.len() as u64 {
            return Err(CritError::InvalidArg(format!(
                "partitioner produced a non-contiguous stream at logical {}",
                entry.logical
            )));
        }
        stream.extend_from_slice(slice);
    }

    replace_atomic(art.crit(), &crit)?;
    replace_atomic(art.noncrit(), &noncrit)?;
    table.save(art.mapping())
}

/// Remove every artefact of a partitioned file; missing ones are ignored.
pub fn remove(art: &Artefacts) -> Result<()> {
    for path in [art.mapping(), art.crit(), art.noncrit()] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(CritError::Io(err)),
        }
    }
    Ok(())
}

/// Rename each artefact independently, ignoring the ones that do not exist.
/// Not atomic: a failure partway leaves the logical file split between the
/// two names.
pub fn rename(from: &Artefacts, to: &Artefacts) -> Result<()> {
    for (from, to) in [
        (from.mapping(), to.mapping()),
        (from.crit(), to.crit()),
        (from.noncrit(), to.noncrit()),
    ] {
        match fs::rename(from, to) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(CritError::Io(err)),
        }
    }
    Ok(())
}
