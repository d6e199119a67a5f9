//! The engine's dispatch-layer interface.
//!
//! The dispatch layer (FUSE or a test harness) resolves nothing itself:
//! it hands absolute paths to these nine operations and maps any
//! [`VsfsError`] through `to_errno()`. Calls are serialized by that layer;
//! mutating operations take `&mut self` accordingly.

use crate::dir::split_path;
use crate::{Filesystem, now_parts, parts_to_time, time_to_parts};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::debug;
use vsfs_error::{Result, VsfsError};
use vsfs_ondisk::Inode;
use vsfs_types::{
    FileKind, InodeNumber, S_IFMT, S_IFREG, VSFS_BLOCK_SIZE, VSFS_MAX_FILE_BLOCKS,
    VSFS_MAX_FILE_SIZE, VSFS_NAME_MAX, VSFS_NUM_DIRECT, VSFS_ROOT_INO,
};

/// Aggregate image counts (statvfs analog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    pub block_size: u32,
    pub num_blocks: u32,
    pub free_blocks: u32,
    pub num_inodes: u32,
    pub free_inodes: u32,
    /// Maximum usable name length in bytes.
    pub name_max: u32,
}

/// Per-file attributes (lstat analog).
///
/// `blocks` is measured in 512-byte sectors and includes the indirect
/// pointer block when one is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    pub ino: InodeNumber,
    pub mode: u32,
    pub kind: FileKind,
    pub nlink: u32,
    pub size: u64,
    pub blocks: u64,
    pub mtime: SystemTime,
}

/// Requested modification-time change (utimensat analog).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtimeUpdate {
    /// Leave the timestamp untouched; the call succeeds without resolving
    /// anything further.
    Omit,
    /// Stamp the current time.
    Now,
    /// Stamp an explicit time.
    At(SystemTime),
}

/// The operations the engine exposes to its dispatch-layer collaborator.
///
/// Paths are absolute within the image (`/` is the root directory, any
/// other path is `/name` in the flat namespace). Single `read`/`write`
/// calls are assumed to stay within one block; the accessors do not loop
/// across blocks.
pub trait FsOps {
    /// Aggregate counts for the whole image.
    fn get_stats(&self) -> FsStats;

    /// Attributes of the file or directory at `path`.
    fn get_attributes(&self, path: &str) -> Result<InodeAttr>;

    /// Call `filler` with each live entry name in the root directory.
    ///
    /// A `false` return from `filler` aborts the listing with
    /// [`VsfsError::OutOfMemory`]. The listing is finite and not
    /// restartable mid-way; `.` and `..` are the dispatch layer's concern.
    fn list_entries(&self, path: &str, filler: &mut dyn FnMut(&str) -> bool) -> Result<()>;

    /// Create an empty regular file.
    ///
    /// Assumes the dispatch layer has verified `path` does not exist yet.
    fn create(&mut self, path: &str, mode: u32) -> Result<()>;

    /// Unlink a file: its data blocks, indirect block, inode, and
    /// directory entry are all released.
    fn remove(&mut self, path: &str) -> Result<()>;

    /// Update the modification timestamp.
    fn set_mtime(&mut self, path: &str, update: MtimeUpdate) -> Result<()>;

    /// Truncate or extend to `new_size` (see the size-change engine).
    fn set_size(&mut self, path: &str, new_size: u64) -> Result<()>;

    /// Read up to `len` bytes at `offset`, clamped to the containing
    /// block and, in the final block, to the file's end. Reading at or
    /// past end-of-file yields an empty result, not an error.
    fn read(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, extending the file first when the range
    /// reaches past the current size. Returns the bytes written.
    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize>;
}

impl Filesystem {
    /// `list_entries` convenience: collect the names instead of streaming.
    pub fn list_names(&self, path: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.list_entries(path, &mut |name| {
            names.push(name.to_owned());
            true
        })?;
        Ok(names)
    }

    fn touch_root(&mut self) -> Result<()> {
        let mut root = self.read_inode(VSFS_ROOT_INO)?;
        (root.mtime_sec, root.mtime_nsec) = now_parts();
        self.write_inode(VSFS_ROOT_INO, &root)
    }
}

fn attr_from_inode(ino: InodeNumber, inode: &Inode) -> Result<InodeAttr> {
    let sectors_per_block = u64::from(VSFS_BLOCK_SIZE) / 512;
    let mut blocks = u64::from(inode.blocks) * sectors_per_block;
    if inode.blocks > VSFS_NUM_DIRECT {
        blocks += sectors_per_block;
    }
    Ok(InodeAttr {
        ino,
        mode: inode.mode,
        kind: inode.kind().map_err(|_| VsfsError::Corruption {
            block: 0,
            detail: format!("inode {ino} has an invalid mode {:o}", inode.mode),
        })?,
        nlink: inode.nlink,
        size: inode.size,
        blocks,
        mtime: parts_to_time(inode.mtime_sec, inode.mtime_nsec),
    })
}

impl FsOps for Filesystem {
    fn get_stats(&self) -> FsStats {
        FsStats {
            block_size: VSFS_BLOCK_SIZE,
            num_blocks: self.sb.num_blocks,
            free_blocks: self.sb.free_blocks,
            num_inodes: self.sb.num_inodes,
            free_inodes: self.sb.free_inodes,
            name_max: u32::try_from(VSFS_NAME_MAX - 1).expect("name limit fits u32"),
        }
    }

    fn get_attributes(&self, path: &str) -> Result<InodeAttr> {
        let resolved = self.resolve_path(path)?;
        attr_from_inode(resolved.ino, &resolved.inode)
    }

    fn list_entries(&self, path: &str, filler: &mut dyn FnMut(&str) -> bool) -> Result<()> {
        // Only the root is a directory; the path is validated, then the
        // root's entries are walked regardless of its name.
        split_path(path)?;
        let completed = self.walk_root_entries(&mut |entry| filler(&entry.name))?;
        if completed {
            Ok(())
        } else {
            Err(VsfsError::OutOfMemory)
        }
    }

    fn create(&mut self, path: &str, mode: u32) -> Result<()> {
        let Some(name) = split_path(path)? else {
            return Err(VsfsError::Format(
                "refusing to create over the root directory".to_owned(),
            ));
        };
        if mode & S_IFMT != S_IFREG {
            return Err(VsfsError::Format(format!(
                "create supports regular files only (mode {mode:o})"
            )));
        }

        // Full space check before any mutation: one inode always, plus a
        // directory block (and possibly the root's indirect block) only
        // when no allocated block has a free slot left.
        if self.sb.free_inodes == 0 {
            return Err(VsfsError::NoSpace);
        }
        let mut root = self.read_inode(VSFS_ROOT_INO)?;
        let free_slot = self.find_free_dentry_slot(&root)?;
        if free_slot.is_none() {
            if root.blocks >= VSFS_MAX_FILE_BLOCKS {
                return Err(VsfsError::NoSpace);
            }
            let needed = 1 + u32::from(root.blocks == VSFS_NUM_DIRECT);
            if needed > self.sb.free_blocks {
                return Err(VsfsError::NoSpace);
            }
        }

        let idx = self
            .inode_bitmap()
            .find_free(self.device())?
            .ok_or(VsfsError::NoSpace)?;
        self.inode_bitmap().set(self.device(), idx)?;
        let ino = InodeNumber(idx);

        let (sec, nsec) = now_parts();
        let inode = Inode::new_file(mode, sec, nsec);
        self.write_inode(ino, &inode)?;
        self.sb.free_inodes -= 1;
        self.write_superblock()?;

        match free_slot {
            Some(loc) => self.write_dentry_at(loc, ino, name)?,
            None => self.insert_dentry(&mut root, ino, name)?,
        }
        self.touch_root()?;

        debug!(path, ino = ino.0, mode, "created file");
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        let resolved = self.resolve_path(path)?;
        let Some(loc) = resolved.dentry else {
            return Err(VsfsError::Format(
                "refusing to remove the root directory".to_owned(),
            ));
        };
        let inode = resolved.inode;

        self.remove_dentry(loc)?;

        for idx in 0..inode.blocks {
            let block = self.block_at(&inode, idx)?;
            self.release_data_block(block)?;
        }
        if let Some(indirect) = inode.indirect {
            self.release_data_block(indirect)?;
        }

        self.clear_inode(resolved.ino)?;
        self.inode_bitmap().clear(self.device(), resolved.ino.0)?;
        self.sb.free_inodes += 1;
        self.write_superblock()?;
        self.touch_root()?;

        debug!(path, ino = resolved.ino.0, "removed file");
        Ok(())
    }

    fn set_mtime(&mut self, path: &str, update: MtimeUpdate) -> Result<()> {
        let (sec, nsec) = match update {
            MtimeUpdate::Omit => return Ok(()),
            MtimeUpdate::Now => now_parts(),
            MtimeUpdate::At(time) => time_to_parts(time),
        };
        let resolved = self.resolve_path(path)?;
        let mut inode = resolved.inode;
        inode.mtime_sec = sec;
        inode.mtime_nsec = nsec;
        self.write_inode(resolved.ino, &inode)
    }

    fn set_size(&mut self, path: &str, new_size: u64) -> Result<()> {
        let resolved = self.resolve_path(path)?;
        let mut inode = resolved.inode;

        if new_size == inode.size {
            return Ok(());
        }
        if new_size > VSFS_MAX_FILE_SIZE {
            return Err(VsfsError::TooLarge);
        }

        debug!(path, from = inode.size, to = new_size, "set_size");
        if new_size > inode.size {
            self.grow_inode(resolved.ino, &mut inode, new_size)
        } else {
            self.shrink_inode(resolved.ino, &mut inode, new_size)
        }
    }

    fn read(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let resolved = self.resolve_path(path)?;
        let inode = resolved.inode;

        // At or past end-of-file: empty result, not an error.
        if inode.size == 0 || offset >= inode.size {
            return Ok(Vec::new());
        }

        let block_size = u64::from(VSFS_BLOCK_SIZE);
        let block_idx = u32::try_from(offset / block_size).map_err(|_| VsfsError::TooLarge)?;
        let block_off = usize::try_from(offset % block_size).expect("offset within block");

        let mut len = len.min(VSFS_BLOCK_SIZE as usize - block_off);
        if block_idx + 1 == inode.blocks {
            let remaining = usize::try_from(inode.size - offset).expect("within final block");
            len = len.min(remaining);
        }

        let block = self.block_at(&inode, block_idx)?;
        let buf = self.dev.read_block(block)?;
        Ok(buf.as_slice()[block_off..block_off + len].to_vec())
    }

    fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let resolved = self.resolve_path(path)?;
        let mut inode = resolved.inode;
        let ino = resolved.ino;

        if data.is_empty() {
            return Ok(0);
        }

        let end = offset
            .checked_add(u64::try_from(data.len()).map_err(|_| VsfsError::TooLarge)?)
            .ok_or(VsfsError::TooLarge)?;
        if end > inode.size {
            // Extend (zero-filling any hole up to the new end) before a
            // single byte lands; a size-change failure writes nothing.
            self.grow_inode(ino, &mut inode, end)?;
        }

        let block_size = u64::from(VSFS_BLOCK_SIZE);
        let block_idx = u32::try_from(offset / block_size).map_err(|_| VsfsError::TooLarge)?;
        let block_off = usize::try_from(offset % block_size).expect("offset within block");
        let len = data.len().min(VSFS_BLOCK_SIZE as usize - block_off);

        let block = self.block_at(&inode, block_idx)?;
        let mut buf = self.dev.read_block(block)?.into_inner();
        buf[block_off..block_off + len].copy_from_slice(&data[..len]);
        self.dev.write_block(block, &buf)?;

        (inode.mtime_sec, inode.mtime_nsec) = now_parts();
        self.write_inode(ino, &inode)?;
        Ok(len)
    }
}
