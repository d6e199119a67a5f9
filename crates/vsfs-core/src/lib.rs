#![forbid(unsafe_code)]
//! The vsfs storage engine.
//!
//! vsfs is a single-directory, inode-based filesystem over a raw
//! block-structured disk image: one superblock, two free-space bitmaps,
//! a fixed inode table, and a data region. Files are addressed through
//! five direct block pointers plus one singly-indirect pointer block.
//!
//! [`Filesystem`] is the context object every operation goes through; it
//! owns the block device, a write-through copy of the superblock, and the
//! derived region geometry. The dispatch layer (FUSE or otherwise) is an
//! external collaborator: it serializes calls, resolves nothing itself,
//! and consumes the [`FsOps`] operations plus
//! [`VsfsError::to_errno`](vsfs_error::VsfsError::to_errno).
//!
//! The engine assumes a single mutating caller at a time (mutating
//! operations take `&mut self`) and performs no write buffering: every
//! successful call's effects are on the device before it returns.

mod block_map;
mod dir;
mod format;
mod itable;
mod ops;
mod resize;

pub use dir::DentryLoc;
pub use format::{FormatOptions, format};
pub use ops::{FsOps, FsStats, InodeAttr, MtimeUpdate};
pub use vsfs_block::{
    BlockBuf, BlockDevice, ByteBlockDevice, ByteDevice, FileByteDevice, MemByteDevice,
    mem_block_device,
};
pub use vsfs_error::{Result, VsfsError};
pub use vsfs_ondisk::{DirEntry, Geometry, Inode, Superblock};
pub use vsfs_types::{
    BlockNumber, FileKind, InodeNumber, S_IFDIR, S_IFREG, VSFS_BLOCK_SIZE, VSFS_MAX_FILE_BLOCKS,
    VSFS_MAX_FILE_SIZE, VSFS_NAME_MAX, VSFS_NUM_DIRECT, VSFS_ROOT_INO,
};

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use vsfs_alloc::BitmapRegion;
use vsfs_types::ParseError;

/// An open vsfs image.
///
/// There is no process-wide state: several images can be open in one
/// process, each with independent context.
pub struct Filesystem {
    dev: Box<dyn BlockDevice>,
    sb: Superblock,
    geo: Geometry,
    ibmap: BitmapRegion,
    dbmap: BitmapRegion,
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("num_blocks", &self.sb.num_blocks)
            .field("num_inodes", &self.sb.num_inodes)
            .field("free_blocks", &self.sb.free_blocks)
            .field("free_inodes", &self.sb.free_inodes)
            .finish_non_exhaustive()
    }
}

impl Filesystem {
    /// Open a formatted image, validating its superblock and geometry.
    ///
    /// Validation failures are [`VsfsError::Format`]; a valid image is
    /// never modified by opening it.
    pub fn open(dev: Box<dyn BlockDevice>) -> Result<Self> {
        let sb_block = dev.read_block(BlockNumber(0))?;
        let sb = Superblock::parse_from_bytes(sb_block.as_slice()).map_err(to_format_error)?;

        if u64::from(sb.num_blocks) > dev.block_count() {
            return Err(VsfsError::Format(format!(
                "superblock claims {} blocks but the device holds {}",
                sb.num_blocks,
                dev.block_count()
            )));
        }
        if sb.fs_size != u64::from(sb.num_blocks) * u64::from(VSFS_BLOCK_SIZE) {
            return Err(VsfsError::Format(format!(
                "superblock size {} disagrees with block count {}",
                sb.fs_size, sb.num_blocks
            )));
        }
        if sb.free_blocks > sb.num_blocks || sb.free_inodes > sb.num_inodes {
            return Err(VsfsError::Format(format!(
                "free counts exceed totals: blocks {}/{}, inodes {}/{}",
                sb.free_blocks, sb.num_blocks, sb.free_inodes, sb.num_inodes
            )));
        }

        let geo = Geometry::derive(sb.num_blocks, sb.num_inodes).map_err(to_format_error)?;
        if geo.data_region_start != sb.data_region {
            return Err(VsfsError::Format(format!(
                "superblock data region {} disagrees with derived geometry {}",
                sb.data_region, geo.data_region_start
            )));
        }

        let ibmap = BitmapRegion::new(geo.inode_bitmap_start, sb.num_inodes);
        let dbmap = BitmapRegion::new(geo.data_bitmap_start, sb.num_blocks);

        Ok(Self {
            dev,
            sb,
            geo,
            ibmap,
            dbmap,
        })
    }

    /// The image's region geometry.
    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Current superblock contents.
    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Flush the device.
    pub fn sync(&self) -> Result<()> {
        self.dev.sync()
    }

    pub(crate) fn device(&self) -> &dyn BlockDevice {
        self.dev.as_ref()
    }

    /// Write the cached superblock through to block 0.
    ///
    /// Called after every free-count change so the on-disk counters never
    /// lag the bitmaps by more than the documented failure window.
    pub(crate) fn write_superblock(&mut self) -> Result<()> {
        let mut buf = vec![0_u8; VSFS_BLOCK_SIZE as usize];
        self.sb
            .write_to_bytes(&mut buf)
            .map_err(|e| corruption_at(BlockNumber(0), &e))?;
        self.dev.write_block(BlockNumber(0), &buf)
    }

    // ── Free-space accounting ───────────────────────────────────────────

    /// Allocate and zero one data block: lowest clear bit, confirmed, then
    /// zero-filled. The caller installs the pointer and bumps the
    /// superblock counter, in that order.
    pub(crate) fn alloc_data_block(&mut self) -> Result<BlockNumber> {
        let idx = self
            .dbmap
            .find_free(self.dev.as_ref())?
            .ok_or(VsfsError::NoSpace)?;
        self.dbmap.set(self.dev.as_ref(), idx)?;
        let block = BlockNumber(idx);
        self.zero_block(block)?;
        Ok(block)
    }

    /// Clear a data block's bitmap bit and credit the superblock.
    pub(crate) fn release_data_block(&mut self, block: BlockNumber) -> Result<()> {
        self.dbmap.clear(self.dev.as_ref(), block.0)?;
        self.sb.free_blocks += 1;
        self.write_superblock()
    }

    pub(crate) fn inode_bitmap(&self) -> BitmapRegion {
        self.ibmap
    }

    // ── Whole-block helpers ─────────────────────────────────────────────

    pub(crate) fn zero_block(&mut self, block: BlockNumber) -> Result<()> {
        let zeros = vec![0_u8; VSFS_BLOCK_SIZE as usize];
        self.dev.write_block(block, &zeros)
    }

    /// Zero bytes `[from, block_size)` of a block, leaving the head intact.
    pub(crate) fn zero_block_tail(&mut self, block: BlockNumber, from: usize) -> Result<()> {
        if from >= VSFS_BLOCK_SIZE as usize {
            return Ok(());
        }
        let mut buf = self.dev.read_block(block)?.into_inner();
        buf[from..].fill(0);
        self.dev.write_block(block, &buf)
    }
}

// ── Error boundary ──────────────────────────────────────────────────────────

/// Mount-time parse failure: the image structure is wrong.
pub(crate) fn to_format_error(err: ParseError) -> VsfsError {
    VsfsError::Format(err.to_string())
}

/// Live-metadata parse failure at a known block.
pub(crate) fn corruption_at(block: BlockNumber, err: &ParseError) -> VsfsError {
    VsfsError::Corruption {
        block: u64::from(block.0),
        detail: err.to_string(),
    }
}

// ── Timestamps ──────────────────────────────────────────────────────────────

pub(crate) fn now_parts() -> (i64, u32) {
    time_to_parts(SystemTime::now())
}

#[expect(clippy::cast_possible_wrap)]
pub(crate) fn time_to_parts(time: SystemTime) -> (i64, u32) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => (since.as_secs() as i64, since.subsec_nanos()),
        // Pre-epoch timestamps saturate to the epoch.
        Err(_) => (0, 0),
    }
}

#[expect(clippy::cast_sign_loss)]
pub(crate) fn parts_to_time(sec: i64, nsec: u32) -> SystemTime {
    if sec >= 0 {
        UNIX_EPOCH + Duration::new(sec as u64, nsec)
    } else {
        UNIX_EPOCH
    }
}
