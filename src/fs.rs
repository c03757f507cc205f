//! FUSE dispatch: translates the kernel's inode-based callbacks onto the
//! path-level [`Gateway`].
//!
//! The kernel speaks inodes; the gateway speaks paths. The adapter keeps a
//! bidirectional inode⇄path table, seeded with the root and grown on
//! lookup. The table is the only piece of state; files themselves are
//! stateless per open, and the handle returned from `open` is never
//! inspected.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use fuser::Errno;
use fuser::FileAttr;
use fuser::FileHandle;
use fuser::FileType;
use fuser::Filesystem;
use fuser::FopenFlags;
use fuser::Generation;
use fuser::INodeNo;
use fuser::KernelConfig;
use fuser::LockOwner;
use fuser::OpenFlags;
use fuser::RenameFlags;
use fuser::ReplyAttr;
use fuser::ReplyCreate;
use fuser::ReplyData;
use fuser::ReplyDirectory;
use fuser::ReplyEmpty;
use fuser::ReplyEntry;
use fuser::ReplyOpen;
use fuser::ReplyWrite;
use fuser::Request;
use fuser::TimeOrNow;
use fuser::WriteFlags;
use log::debug;
use log::info;
use parking_lot::Mutex;

use crate::error::Result;
use crate::gateway::Attr;
use crate::gateway::EntryKind;
use crate::gateway::Gateway;

const TTL: Duration = Duration::new(0, 0);
const BLOCK_SIZE: u32 = 512;
const MAX_NAME_LENGTH: usize = 255;

/// Inode⇄relative-path table. Inodes are allocated on first sight of a path
/// and never reused within a session.
#[derive(Debug)]
struct InodeTable {
    next: u64,
    paths: HashMap<u64, PathBuf>,
    inos: HashMap<PathBuf, u64>,
}

impl InodeTable {
    fn new() -> InodeTable {
        let mut table = InodeTable {
            next: INodeNo::ROOT.0 + 1,
            paths: HashMap::new(),
            inos: HashMap::new(),
        };
        table.paths.insert(INodeNo::ROOT.0, PathBuf::new());
        table.inos.insert(PathBuf::new(), INodeNo::ROOT.0);
        table
    }

    fn path_of(&self, ino: INodeNo) -> Option<PathBuf> {
        self.paths.get(&ino.0).cloned()
    }

    fn assign(&mut self, path: &Path) -> INodeNo {
        if let Some(ino) = self.inos.get(path) {
            return INodeNo(*ino);
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_path_buf());
        self.inos.insert(path.to_path_buf(), ino);
        INodeNo(ino)
    }

    fn drop_path(&mut self, path: &Path) {
        if let Some(ino) = self.inos.remove(path) {
            self.paths.remove(&ino);
        }
    }

    /// Re-key `from` and everything beneath it to live under `to`.
    fn rename(&mut self, from: &Path, to: &Path) {
        let moved: Vec<(PathBuf, u64)> = self
            .inos
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            self.inos.remove(&old);
            self.inos.insert(new.clone(), ino);
            self.paths.insert(ino, new);
        }
    }
}

/// The filesystem served to the kernel.
pub struct CriticalFs {
    gateway: Gateway,
    inodes: Mutex<InodeTable>,
    direct_io: bool,
}

impl CriticalFs {
    pub fn new(backing_root: PathBuf, direct_io: bool) -> CriticalFs {
        CriticalFs {
            gateway: Gateway::new(backing_root),
            inodes: Mutex::new(InodeTable::new()),
            direct_io,
        }
    }

    fn path_of(&self, ino: INodeNo) -> std::result::Result<PathBuf, Errno> {
        self.inodes.lock().path_of(ino).ok_or(Errno::ENOENT)
    }

    fn attr_for(&self, ino: INodeNo, rel: &Path, req: &Request) -> Result<FileAttr> {
        Ok(build_attr(ino, self.gateway.getattr(rel)?, req))
    }

    fn open_flags(&self) -> FopenFlags {
        if self.direct_io {
            FopenFlags::FOPEN_DIRECT_IO
        } else {
            FopenFlags::empty()
        }
    }
}

fn build_attr(ino: INodeNo, attr: Attr, req: &Request) -> FileAttr {
    match attr {
        Attr::Mapped { size, modified } => FileAttr {
            ino,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: modified,
            mtime: modified,
            ctime: modified,
            crtime: SystemTime::UNIX_EPOCH,
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid: req.uid(),
            gid: req.gid(),
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        },
        Attr::Backing(md) => FileAttr {
            ino,
            size: md.len(),
            blocks: md.blocks(),
            atime: md.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            crtime: SystemTime::UNIX_EPOCH,
            kind: kind_of(&md),
            perm: (md.mode() & !libc::S_IFMT) as u16,
            nlink: md.nlink() as u32,
            uid: md.uid(),
            gid: md.gid(),
            rdev: md.rdev() as u32,
            blksize: md.blksize() as u32,
            flags: 0,
        },
    }
}

fn kind_of(md: &fs::Metadata) -> FileType {
    let ft = md.file_type();
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    }
}

fn fuse_kind(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::Symlink => FileType::Symlink,
        EntryKind::File | EntryKind::Other => FileType::RegularFile,
    }
}

impl Filesystem for CriticalFs {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> io::Result<()> {
        fs::create_dir_all(self.gateway.backing_root())?;
        info!("serving from {:?}", self.gateway.backing_root());
        Ok(())
    }

    fn lookup(&self, req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        if name.len() > MAX_NAME_LENGTH {
            reply.error(Errno::ENAMETOOLONG);
            return;
        }
        let parent_path = match self.path_of(parent) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let child = parent_path.join(name);
        match self.gateway.getattr(&child) {
            Ok(attr) => {
                let ino = self.inodes.lock().assign(&child);
                reply.entry(&TTL, &build_attr(ino, attr, req), Generation(0));
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&self, req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let rel = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.attr_for(ino, &rel, req) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &self,
        req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<fuser::BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let rel = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Some(size) = size {
            debug!("truncate {rel:?} to {size}");
            if let Err(err) = self.gateway.truncate(&rel, size) {
                reply.error(err.errno());
                return;
            }
        }
        if mode.is_some() || uid.is_some() || gid.is_some() {
            // Artefact permissions and ownership are not modelled.
            debug!("ignoring chmod/chown on {rel:?}");
        }
        match self.attr_for(ino, &rel, req) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mkdir(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir() called with {parent:?} {name:?} {mode:o}");
        let parent_path = match self.path_of(parent) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let child = parent_path.join(name);
        if let Err(err) = self.gateway.mkdir(&child, mode) {
            reply.error(err.errno());
            return;
        }
        let ino = self.inodes.lock().assign(&child);
        match self.attr_for(ino, &child, req) {
            Ok(attr) => reply.entry(&TTL, &attr, Generation(0)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink() called with {parent:?} {name:?}");
        let parent_path = match self.path_of(parent) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let child = parent_path.join(name);
        match self.gateway.unlink(&child) {
            Ok(()) => {
                self.inodes.lock().drop_path(&child);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir() called with {parent:?} {name:?}");
        let parent_path = match self.path_of(parent) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let child = parent_path.join(name);
        match self.gateway.rmdir(&child) {
            Ok(()) => {
                self.inodes.lock().drop_path(&child);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        flags: RenameFlags,
        reply: ReplyEmpty,
    ) {
        if !flags.is_empty() {
            reply.error(Errno::EINVAL);
            return;
        }
        let (from, to) = {
            let table = self.inodes.lock();
            match (table.path_of(parent), table.path_of(newparent)) {
                (Some(from_dir), Some(to_dir)) => (from_dir.join(name), to_dir.join(newname)),
                _ => {
                    reply.error(Errno::ENOENT);
                    return;
                }
            }
        };
        debug!("rename {from:?} -> {to:?}");
        match self.gateway.rename(&from, &to) {
            Ok(()) => {
                let mut table = self.inodes.lock();
                table.drop_path(&to);
                table.rename(&from, &to);
                reply.ok();
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        // Stateless: nothing is tracked per open.
        reply.opened(FileHandle(0), self.open_flags());
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        debug!("read() called on {ino:?} offset={offset} size={size}");
        let rel = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.gateway.read(&rel, offset, size as usize) {
            Ok(buf) => reply.data(&buf),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        debug!("write() called on {ino:?} size={}", data.len());
        let rel = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.gateway.write(&rel, data, offset) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn create(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create() called with {parent:?} {name:?}");
        let parent_path = match self.path_of(parent) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let child = parent_path.join(name);
        if let Err(err) = self.gateway.create(&child, mode) {
            reply.error(err.errno());
            return;
        }
        let ino = self.inodes.lock().assign(&child);
        match self.attr_for(ino, &child, req) {
            Ok(attr) => reply.created(
                &TTL,
                &attr,
                Generation(0),
                FileHandle(0),
                FopenFlags::empty(),
            ),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn opendir(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        reply.opened(FileHandle(0), FopenFlags::empty());
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir() called with {ino:?} offset={offset}");
        let rel = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let children = match self.gateway.readdir(&rel) {
            Ok(children) => children,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };

        let mut table = self.inodes.lock();
        let parent_ino = match rel.parent() {
            Some(parent) => table.assign(parent),
            None => ino,
        };
        let mut entries = vec![
            (ino, FileType::Directory, std::ffi::OsString::from(".")),
            (parent_ino, FileType::Directory, std::ffi::OsString::from("..")),
        ];
        for child in children {
            let child_ino = table.assign(&rel.join(&child.name));
            entries.push((child_ino, fuse_kind(child.kind), child.name));
        }
        drop(table);

        for (index, (entry_ino, kind, name)) in
            entries.into_iter().skip(offset as usize).enumerate()
        {
            let buffer_full = reply.add(entry_ino, offset + index as u64 + 1, kind, &name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }
}
