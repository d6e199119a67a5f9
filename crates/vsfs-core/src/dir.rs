//! Directory management and path resolution.
//!
//! vsfs has exactly one directory: the root, inode 0. Its entries live in
//! its own data blocks, sixteen 256-byte slots per block, scanned in
//! logical block order through the addressing layer. Free slots are holes
//! left by unlink; creation reuses the first hole before the root is ever
//! extended.

use crate::{Filesystem, corruption_at};
use vsfs_error::{Result, VsfsError};
use vsfs_ondisk::{self as ondisk, DirEntry, Inode};
use vsfs_types::{
    BlockNumber, InodeNumber, VSFS_BLOCK_SIZE, VSFS_DENTRIES_PER_BLOCK, VSFS_DENTRY_SIZE,
    VSFS_NAME_MAX, VSFS_PATH_MAX, VSFS_ROOT_INO,
};

/// Location of one directory entry slot: physical block plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DentryLoc {
    pub block: BlockNumber,
    pub offset: usize,
}

/// A resolved path: the inode it names, and the directory entry slot for
/// everything but the root itself.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub ino: InodeNumber,
    pub inode: Inode,
    pub dentry: Option<DentryLoc>,
}

/// Split an absolute path into its single flat-namespace name.
///
/// Returns `None` for the root path. Anything after the leading separator
/// is one filename; there are no nested directories to descend into.
pub(crate) fn split_path(path: &str) -> Result<Option<&str>> {
    if !path.starts_with('/') {
        return Err(VsfsError::NotAbsolute(path.to_owned()));
    }
    if path.len() >= VSFS_PATH_MAX {
        return Err(VsfsError::NameTooLong);
    }
    if path == "/" {
        return Ok(None);
    }
    let name = &path[1..];
    if name.len() >= VSFS_NAME_MAX {
        return Err(VsfsError::NameTooLong);
    }
    Ok(Some(name))
}

impl Filesystem {
    /// Resolve an absolute path to its inode and directory entry slot.
    pub(crate) fn resolve_path(&self, path: &str) -> Result<Resolved> {
        let Some(name) = split_path(path)? else {
            return Ok(Resolved {
                ino: VSFS_ROOT_INO,
                inode: self.read_inode(VSFS_ROOT_INO)?,
                dentry: None,
            });
        };

        let root = self.read_inode(VSFS_ROOT_INO)?;
        let Some((ino, loc)) = self.find_dentry(&root, name)? else {
            return Err(VsfsError::NotFound(path.to_owned()));
        };
        Ok(Resolved {
            ino,
            inode: self.read_inode(ino)?,
            dentry: Some(loc),
        })
    }

    /// Scan the root's allocated blocks for a live entry with this name.
    fn find_dentry(&self, root: &Inode, name: &str) -> Result<Option<(InodeNumber, DentryLoc)>> {
        for idx in 0..root.blocks {
            let block = self.block_at(root, idx)?;
            let buf = self.dev.read_block(block)?;
            for slot in 0..VSFS_DENTRIES_PER_BLOCK {
                let offset = slot * VSFS_DENTRY_SIZE;
                let bytes = &buf.as_slice()[offset..offset + VSFS_DENTRY_SIZE];
                if ondisk::dentry_matches(bytes, name).map_err(|e| corruption_at(block, &e))? {
                    let entry = ondisk::parse_dentry(bytes)
                        .map_err(|e| corruption_at(block, &e))?
                        .expect("matching slot is live");
                    return Ok(Some((entry.ino, DentryLoc { block, offset })));
                }
            }
        }
        Ok(None)
    }

    /// First free slot across all allocated directory blocks, if any.
    pub(crate) fn find_free_dentry_slot(&self, root: &Inode) -> Result<Option<DentryLoc>> {
        for idx in 0..root.blocks {
            let block = self.block_at(root, idx)?;
            let buf = self.dev.read_block(block)?;
            for slot in 0..VSFS_DENTRIES_PER_BLOCK {
                let offset = slot * VSFS_DENTRY_SIZE;
                let bytes = &buf.as_slice()[offset..offset + VSFS_DENTRY_SIZE];
                if ondisk::parse_dentry(bytes)
                    .map_err(|e| corruption_at(block, &e))?
                    .is_none()
                {
                    return Ok(Some(DentryLoc { block, offset }));
                }
            }
        }
        Ok(None)
    }

    /// Write a live entry into a known slot.
    pub(crate) fn write_dentry_at(
        &mut self,
        loc: DentryLoc,
        ino: InodeNumber,
        name: &str,
    ) -> Result<()> {
        let mut buf = self.dev.read_block(loc.block)?.into_inner();
        ondisk::write_dentry(
            &mut buf[loc.offset..loc.offset + VSFS_DENTRY_SIZE],
            ino,
            name,
        )
        .map_err(|e| corruption_at(loc.block, &e))?;
        self.dev.write_block(loc.block, &buf)
    }

    /// Record `name → ino` in the root directory.
    ///
    /// Reuses a free slot when one exists anywhere in the already
    /// allocated directory blocks; otherwise extends the root by one
    /// block through the size-change engine (which allocates the root's
    /// indirect block at the direct-capacity boundary, like any file),
    /// formats the new block's slots as free, and takes slot 0. The
    /// caller is responsible for the free-space precheck and for
    /// persisting `root`.
    pub(crate) fn insert_dentry(
        &mut self,
        root: &mut Inode,
        ino: InodeNumber,
        name: &str,
    ) -> Result<()> {
        if let Some(loc) = self.find_free_dentry_slot(root)? {
            return self.write_dentry_at(loc, ino, name);
        }

        let new_size = root.size + u64::from(VSFS_BLOCK_SIZE);
        self.grow_inode(VSFS_ROOT_INO, root, new_size)?;
        let block = self.block_at(root, root.blocks - 1)?;

        let mut buf = self.dev.read_block(block)?.into_inner();
        ondisk::format_dentry_block(&mut buf).map_err(|e| corruption_at(block, &e))?;
        ondisk::write_dentry(&mut buf[0..VSFS_DENTRY_SIZE], ino, name)
            .map_err(|e| corruption_at(block, &e))?;
        self.dev.write_block(block, &buf)
    }

    /// Clear the slot at `loc` back to the free state. The hole is left in
    /// place; directory blocks are never compacted or released.
    pub(crate) fn remove_dentry(&mut self, loc: DentryLoc) -> Result<()> {
        let mut buf = self.dev.read_block(loc.block)?.into_inner();
        ondisk::clear_dentry(&mut buf[loc.offset..loc.offset + VSFS_DENTRY_SIZE])
            .map_err(|e| corruption_at(loc.block, &e))?;
        self.dev.write_block(loc.block, &buf)
    }

    /// Visit every live entry in the root, in block order.
    ///
    /// `visit` returning `false` aborts the walk with `Ok(false)`.
    pub(crate) fn walk_root_entries(
        &self,
        visit: &mut dyn FnMut(&DirEntry) -> bool,
    ) -> Result<bool> {
        let root = self.read_inode(VSFS_ROOT_INO)?;
        for idx in 0..root.blocks {
            let block = self.block_at(&root, idx)?;
            let buf = self.dev.read_block(block)?;
            for slot in 0..VSFS_DENTRIES_PER_BLOCK {
                let offset = slot * VSFS_DENTRY_SIZE;
                let bytes = &buf.as_slice()[offset..offset + VSFS_DENTRY_SIZE];
                let parsed = ondisk::parse_dentry(bytes).map_err(|e| corruption_at(block, &e))?;
                if let Some(entry) = parsed {
                    if !visit(&entry) {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}
