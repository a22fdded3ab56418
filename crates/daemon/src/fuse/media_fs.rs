//! Read-only FUSE filesystem over the published catalog index
//!
//! Directory structure comes from the current [`FilesystemIndex`] snapshot,
//! file contents from the [`BlockCache`]. Each callback loads the snapshot
//! once, so a concurrent index swap never shows a half-built tree.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use tokio::runtime::Handle;

use common::vfs::path;
use common::FilesystemIndex;

use super::block_cache::{BlockCache, ReadError};
use super::inode_table::InodeTable;

const DIR_PERM: u16 = 0o755;
const FILE_PERM: u16 = 0o444;
const BLOCK_SIZE: u32 = 512;

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to mount at {path}: {source}")]
    MountFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct MediaFs {
    cache: Arc<BlockCache>,
    inodes: InodeTable,
    /// Open file handle to path
    handles: HashMap<u64, String>,
    next_handle: u64,
    /// Index generation the inode table was last pruned against
    generation: u64,
    mounted_at: SystemTime,
    attr_ttl: Duration,
    runtime: Handle,
}

impl MediaFs {
    /// Must be called from within a tokio runtime; reads are bridged onto it.
    pub fn new(cache: Arc<BlockCache>, attr_ttl: Duration) -> Result<Self, MountError> {
        let runtime = Handle::try_current()?;
        Ok(Self {
            cache,
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            next_handle: 1,
            generation: 0,
            mounted_at: SystemTime::now(),
            attr_ttl,
            runtime,
        })
    }

    fn snapshot(&mut self) -> Arc<FilesystemIndex> {
        let index = self.cache.index().load();
        if index.generation() != self.generation {
            let pruned = self.inodes.prune(&index);
            tracing::debug!(
                generation = index.generation(),
                pruned,
                "filesystem index replaced"
            );
            self.generation = index.generation();
        }
        index
    }

    fn attr(&self, ino: u64, path: &str, index: &FilesystemIndex) -> Option<FileAttr> {
        let (kind, perm, size, nlink) = if let Some(record) = index.get_record(path) {
            (FileType::RegularFile, FILE_PERM, record.file_size, 1)
        } else if index.is_directory(path) {
            (FileType::Directory, DIR_PERM, 0, 2)
        } else {
            return None;
        };

        Some(FileAttr {
            ino,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm,
            nlink,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        })
    }

    fn lookup_child(&mut self, parent: u64, name: &OsStr) -> Result<FileAttr, i32> {
        let index = self.snapshot();
        let parent_path = self.inodes.get_path(parent).ok_or(libc::ENOENT)?.to_string();
        if index.is_file(&parent_path) {
            return Err(libc::ENOTDIR);
        }
        if !index.is_directory(&parent_path) {
            return Err(libc::ENOENT);
        }
        let name = name.to_str().ok_or(libc::ENOENT)?;
        if !path::is_valid_component(name) {
            return Err(libc::ENOENT);
        }

        let child = path::join(&parent_path, name);
        if !index.is_directory(&child) && !index.is_file(&child) {
            return Err(libc::ENOENT);
        }
        let ino = self.inodes.get_or_create(&child);
        self.attr(ino, &child, &index).ok_or(libc::ENOENT)
    }

    fn getattr_inode(&mut self, ino: u64) -> Result<FileAttr, i32> {
        let index = self.snapshot();
        let path = self.inodes.get_path(ino).ok_or(libc::ENOENT)?;
        self.attr(ino, path, &index).ok_or(libc::ENOENT)
    }

    fn directory_entries(&mut self, ino: u64) -> Result<Vec<(u64, FileType, String)>, i32> {
        let index = self.snapshot();
        let dir = self.inodes.get_path(ino).ok_or(libc::ENOENT)?.to_string();
        if index.is_file(&dir) {
            return Err(libc::ENOTDIR);
        }
        let children = index.list_children(&dir).ok_or(libc::ENOENT)?;

        let parent_ino = self.inodes.get_or_create(&path::parent(&dir));
        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for name in children {
            let child = path::join(&dir, name);
            let kind = if index.is_file(&child) {
                FileType::RegularFile
            } else {
                FileType::Directory
            };
            entries.push((self.inodes.get_or_create(&child), kind, name.clone()));
        }
        Ok(entries)
    }

    fn open_file(&mut self, ino: u64, flags: i32) -> Result<u64, i32> {
        let index = self.snapshot();
        let path = self.inodes.get_path(ino).ok_or(libc::ENOENT)?.to_string();
        if index.is_directory(&path) {
            return Err(libc::EISDIR);
        }
        if !index.is_file(&path) {
            return Err(libc::ENOENT);
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(libc::EACCES);
        }

        let fh = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(fh, path);
        Ok(fh)
    }

    fn read_handle(&mut self, ino: u64, fh: u64, offset: i64, size: u32) -> Result<bytes::Bytes, i32> {
        let path = match self.handles.get(&fh) {
            Some(path) => path.clone(),
            None => self.inodes.get_path(ino).ok_or(libc::EBADF)?.to_string(),
        };
        if offset < 0 {
            return Err(libc::EINVAL);
        }

        let cache = self.cache.clone();
        self.runtime
            .block_on(async move { cache.read(&path, offset as u64, size as u64).await })
            .map_err(|err| match err {
                ReadError::NotFound(_) => libc::ENOENT,
                err => {
                    tracing::warn!(ino, offset, size, "read failed: {}", err);
                    libc::EIO
                }
            })
    }
}

impl Filesystem for MediaFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_child(parent, name) {
            Ok(attr) => reply.entry(&self.attr_ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.getattr_inode(ino) {
            Ok(attr) => reply.attr(&self.attr_ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.directory_entries(ino) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_file(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_handle(ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.remove(&fh);
        reply.ok();
    }
}

fn mount_options(allow_other: bool) -> Vec<MountOption> {
    let mut options = vec![MountOption::RO, MountOption::FSName("tmc".into())];
    if allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

/// Mount in the background; the filesystem is unmounted when the returned
/// session is dropped.
pub fn spawn_mount(
    fs: MediaFs,
    mountpoint: &Path,
    allow_other: bool,
) -> Result<fuser::BackgroundSession, MountError> {
    tracing::info!(mountpoint = %mountpoint.display(), allow_other, "mounting catalog filesystem");
    fuser::spawn_mount2(fs, mountpoint, &mount_options(allow_other)).map_err(|source| {
        MountError::MountFailed {
            path: mountpoint.display().to_string(),
            source,
        }
    })
}
