//! The path-level filesystem gateway.
//!
//! Every operation takes a logical path relative to the mount point,
//! decides whether it names a partitioned file (a partitioner binds to the
//! extension and/or a `.mapping` sidecar exists in the backing directory)
//! and routes accordingly: partitioned files go through the mapping
//! machinery in [`store`](crate::store), everything else passes straight
//! through to the backing directory. Directory listings hide the artefacts
//! and present each `.mapping` sidecar as its stem.
//!
//! The gateway is deliberately free of any FUSE types so the whole core can
//! be exercised without a mount.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::FileExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use log::debug;

use crate::error::CritError;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::partition::Format;
use crate::store;
use crate::store::Artefacts;
use crate::store::PathLocks;

/// What `getattr` resolved a logical path to.
#[derive(Debug)]
pub enum Attr {
    /// A partitioned file; its size comes from the mapping, not the backing
    /// directory, and its times from the sidecar.
    Mapped { size: u64, modified: SystemTime },
    /// A plain backing entry.
    Backing(fs::Metadata),
}

/// A single directory listing entry after artefact hiding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// The dispatch layer bound to one backing directory.
#[derive(Debug)]
pub struct Gateway {
    backing_root: PathBuf,
    locks: PathLocks,
}

impl Gateway {
    pub fn new(backing_root: PathBuf) -> Gateway {
        Gateway {
            backing_root,
            locks: PathLocks::new(),
        }
    }

    pub fn backing_root(&self) -> &Path {
        &self.backing_root
    }

    fn backing_path(&self, rel: &Path) -> PathBuf {
        self.backing_root.join(rel)
    }

    fn artefacts(&self, rel: &Path) -> Artefacts {
        Artefacts::at(&self.backing_path(rel))
    }

    pub fn getattr(&self, rel: &Path) -> Result<Attr> {
        let art = self.artefacts(rel);
        if art.mapping_exists() {
            if Format::for_path(rel).is_none() {
                return Err(CritError::Unsupported(rel.to_path_buf()));
            }
            let table = MappingTable::load(art.mapping())?;
            let modified = fs::metadata(art.mapping())
                .and_then(|md| md.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            return Ok(Attr::Mapped {
                size: table.logical_size(),
                modified,
            });
        }
        match fs::symlink_metadata(self.backing_path(rel)) {
            Ok(md) => Ok(Attr::Backing(md)),
            Err(err) => Err(CritError::from_backing(err)),
        }
    }

    /// List a directory with the artefacts collapsed away: `.crit`,
    /// `.noncrit` and in-flight `.tmp` artefacts are hidden, and each
    /// `.mapping` sidecar appears once under its stem. `.` and `..` are the
    /// caller's business.
    pub fn readdir(&self, rel: &Path) -> Result<Vec<DirEntry>> {
        let dir = fs::read_dir(self.backing_path(rel)).map_err(CritError::from_backing)?;
        let mut seen: BTreeMap<OsString, EntryKind> = BTreeMap::new();
        for entry in dir {
            let entry = entry?;
            let name = entry.file_name();
            if is_hidden_artefact(name.as_bytes()) {
                continue;
            }
            let stem = name
                .as_bytes()
                .strip_suffix(store::MAPPING_SUFFIX.as_bytes())
                .filter(|stem| !stem.is_empty())
                .map(|stem| OsStr::from_bytes(stem).to_os_string());
            let (name, kind) = match stem {
                Some(stem) => (stem, EntryKind::File),
                None => {
                    let kind = entry
                        .file_type()
                        .map(EntryKind::from)
                        .unwrap_or(EntryKind::Other);
                    (name, kind)
                }
            };
            seen.entry(name).or_insert(kind);
        }
        Ok(seen
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }

    pub fn read(&self, rel: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
        let art = self.artefacts(rel);
        if art.mapping_exists() {
            if Format::for_path(rel).is_none() {
                return Err(CritError::Unsupported(rel.to_path_buf()));
            }
            return store::read(&art, offset, size);
        }
        let file = fs::File::open(self.backing_path(rel)).map_err(CritError::from_backing)?;
        let file_size = file.metadata()?.len();
        let len = (size as u64).min(file_size.saturating_sub(offset)) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    pub fn write(&self, rel: &Path, data: &[u8], offset: u64) -> Result<usize> {
        if let Some(format) = Format::for_path(rel) {
            store::write(&self.artefacts(rel), format, &self.locks, data, offset)?;
            return Ok(data.len());
        }
        let file = OpenOptions::new()
            .write(true)
            .open(self.backing_path(rel))
            .map_err(CritError::from_backing)?;
        file.write_all_at(data, offset)?;
        Ok(data.len())
    }

    /// Bring a logical file into existence. Partitioned files start as an
    /// empty mapping; the streams appear on first write.
    pub fn create(&self, rel: &Path, mode: u32) -> Result<()> {
        if Format::for_path(rel).is_some() {
            let art = self.artefacts(rel);
            debug!("create {:?} as partitioned file", rel);
            return MappingTable::new().save(art.mapping());
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode & !libc::S_IFMT)
            .open(self.backing_path(rel))
            .map_err(CritError::from_backing)?;
        Ok(())
    }

    pub fn unlink(&self, rel: &Path) -> Result<()> {
        let art = self.artefacts(rel);
        if Format::for_path(rel).is_some() && art.mapping_exists() {
            return store::remove(&art);
        }
        fs::remove_file(self.backing_path(rel)).map_err(CritError::from_backing)
    }

    pub fn mkdir(&self, rel: &Path, mode: u32) -> Result<()> {
        fs::DirBuilder::new()
            .mode(mode)
            .create(self.backing_path(rel))
            .map_err(CritError::from_backing)
    }

    pub fn rmdir(&self, rel: &Path) -> Result<()> {
        fs::remove_dir(self.backing_path(rel)).map_err(CritError::from_backing)
    }

    /// Move a logical file or directory. For partitioned files each
    /// artefact, including the optional plain backing path, is renamed
    /// independently with individual misses ignored; a failure partway
    /// leaves the logical file split between the two names and is surfaced
    /// to the caller.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_backing = self.backing_path(from);
        let to_backing = self.backing_path(to);
        if Format::for_path(from).is_some() {
            store::rename(&Artefacts::at(&from_backing), &Artefacts::at(&to_backing))?;
            return match fs::rename(&from_backing, &to_backing) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(CritError::Io(err)),
            };
        }
        fs::rename(&from_backing, &to_backing).map_err(CritError::from_backing)
    }

    pub fn truncate(&self, rel: &Path, size: u64) -> Result<()> {
        if let Some(format) = Format::for_path(rel) {
            return store::truncate(&self.artefacts(rel), format, &self.locks, size);
        }
        let file = OpenOptions::new()
            .write(true)
            .open(self.backing_path(rel))
            .map_err(CritError::from_backing)?;
        file.set_len(size)?;
        Ok(())
    }
}

impl From<fs::FileType> for EntryKind {
    fn from(ft: fs::FileType) -> EntryKind {
        if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

/// `.crit` and `.noncrit` never show; neither does a `.tmp` left behind by
/// an interrupted artefact replacement. A user's own `.tmp` files are not
/// ours to hide.
fn is_hidden_artefact(name: &[u8]) -> bool {
    if name.ends_with(store::CRIT_SUFFIX.as_bytes())
        || name.ends_with(store::NONCRIT_SUFFIX.as_bytes())
    {
        return true;
    }
    match name.strip_suffix(store::TMP_SUFFIX.as_bytes()) {
        Some(stem) => {
            stem.ends_with(store::MAPPING_SUFFIX.as_bytes())
                || stem.ends_with(store::CRIT_SUFFIX.as_bytes())
                || stem.ends_with(store::NONCRIT_SUFFIX.as_bytes())
        }
        None => false,
    }
}
