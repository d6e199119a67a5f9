//! The size-change engine: grow and shrink a file's allocated block set.
//!
//! Both paths preserve the mutation ordering the on-disk format was
//! designed around: allocate bitmap bit, install pointer, update
//! superblock counters, then size/block-count/mtime last. Space
//! requirements are checked in full before the first allocation, so an
//! insufficient-space condition never leaves a partial grow behind.
//!
//! Boundary semantics: tail zeroing applies only when the boundary size is
//! not block-aligned. Growing from a partially used last block zeroes its
//! newly exposed tail; shrinking into a partially retained last block
//! zeroes the bytes past the new size; a block-aligned size has no tail to
//! zero in place.

use crate::{Filesystem, now_parts};
use tracing::trace;
use vsfs_error::{Result, VsfsError};
use vsfs_ondisk::Inode;
use vsfs_types::{
    InodeNumber, VSFS_BLOCK_SIZE, VSFS_MAX_FILE_BLOCKS, VSFS_NUM_DIRECT, blocks_for_size,
};

impl Filesystem {
    /// Extend `inode` to `new_size`, zero-filling every new byte.
    ///
    /// Requires `new_size > inode.size`. Fails with [`VsfsError::TooLarge`]
    /// past the direct + indirect addressing limit and with
    /// [`VsfsError::NoSpace`] when the incremental block requirement
    /// (including the indirect pointer block when the growth crosses the
    /// direct-capacity boundary) exceeds the free pool; in both cases the
    /// check happens before any mutation. Persists the inode on success.
    pub(crate) fn grow_inode(
        &mut self,
        ino: InodeNumber,
        inode: &mut Inode,
        new_size: u64,
    ) -> Result<()> {
        let cur_blocks = inode.blocks;
        let new_blocks = blocks_for_size(new_size);
        if new_blocks > VSFS_MAX_FILE_BLOCKS {
            return Err(VsfsError::TooLarge);
        }

        let crosses_boundary = cur_blocks <= VSFS_NUM_DIRECT && new_blocks > VSFS_NUM_DIRECT;
        let needed = (new_blocks - cur_blocks) + u32::from(crosses_boundary);
        if needed > self.sb.free_blocks {
            return Err(VsfsError::NoSpace);
        }

        trace!(ino = ino.0, from = inode.size, to = new_size, needed, "grow");

        // The old last block keeps live data; zero only its newly exposed
        // tail. A block-aligned size has no tail.
        let tail = inode.size % u64::from(VSFS_BLOCK_SIZE);
        if cur_blocks > 0 && tail != 0 {
            let last = self.block_at(inode, cur_blocks - 1)?;
            self.zero_block_tail(last, usize::try_from(tail).expect("tail < block size"))?;
        }

        for idx in cur_blocks..new_blocks {
            if idx == VSFS_NUM_DIRECT && inode.indirect.is_none() {
                // First excess block: the indirect pointer block comes first.
                let indirect = self.alloc_data_block()?;
                inode.indirect = Some(indirect);
                self.sb.free_blocks -= 1;
                self.write_superblock()?;
            }
            let block = self.alloc_data_block()?;
            self.install_block(inode, idx, block)?;
            self.sb.free_blocks -= 1;
            self.write_superblock()?;
        }

        inode.blocks = new_blocks;
        inode.size = new_size;
        (inode.mtime_sec, inode.mtime_nsec) = now_parts();
        self.write_inode(ino, inode)
    }

    /// Shrink `inode` to `new_size`, releasing every block past the new
    /// block count.
    ///
    /// Requires `new_size < inode.size`. Dropped blocks are zeroed before
    /// their bitmap bits clear and their pointer slots reset to
    /// unassigned; the indirect pointer block itself is freed exactly when
    /// the block count drops back to the direct capacity or below.
    /// Persists the inode on success.
    pub(crate) fn shrink_inode(
        &mut self,
        ino: InodeNumber,
        inode: &mut Inode,
        new_size: u64,
    ) -> Result<()> {
        let cur_blocks = inode.blocks;
        let new_blocks = blocks_for_size(new_size);

        trace!(ino = ino.0, from = inode.size, to = new_size, "shrink");

        for idx in new_blocks..cur_blocks {
            let block = self.block_at(inode, idx)?;
            self.zero_block(block)?;
            self.clear_block_slot(inode, idx)?;
            self.release_data_block(block)?;
        }

        if cur_blocks > VSFS_NUM_DIRECT && new_blocks <= VSFS_NUM_DIRECT {
            let indirect = inode.indirect.take().ok_or_else(|| VsfsError::Corruption {
                block: 0,
                detail: "indirect block missing while shrinking across the boundary".to_owned(),
            })?;
            self.zero_block(indirect)?;
            self.release_data_block(indirect)?;
        }

        // The new last block is partially retained; zero what lies past
        // the new size. A block-aligned size retains the block whole.
        let tail = new_size % u64::from(VSFS_BLOCK_SIZE);
        if new_blocks > 0 && tail != 0 {
            let last = self.block_at(inode, new_blocks - 1)?;
            self.zero_block_tail(last, usize::try_from(tail).expect("tail < block size"))?;
        }

        inode.blocks = new_blocks;
        inode.size = new_size;
        (inode.mtime_sec, inode.mtime_nsec) = now_parts();
        self.write_inode(ino, inode)
    }
}
