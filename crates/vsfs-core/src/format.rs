//! Image formatting (mkfs).
//!
//! Lays down the fixed partition order (superblock, inode bitmap, data
//! bitmap, inode table, data region), marks every metadata block used in
//! the data bitmap, and writes the root directory inode. Runs once,
//! before [`Filesystem::open`](crate::Filesystem::open); the engine never
//! creates or destroys the root.

use crate::{now_parts, to_format_error};
use tracing::debug;
use vsfs_alloc::BitmapRegion;
use vsfs_block::BlockDevice;
use vsfs_error::{Result, VsfsError};
use vsfs_ondisk::{Geometry, Inode, Superblock};
use vsfs_types::{BlockNumber, VSFS_BLOCK_SIZE, VSFS_INODE_SIZE, VSFS_ROOT_INO};

/// Formatting parameters. The block count comes from the device itself.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// Inode table capacity.
    pub num_inodes: u32,
}

/// Write a fresh, empty vsfs image onto `dev`.
pub fn format(dev: &dyn BlockDevice, opts: &FormatOptions) -> Result<()> {
    let num_blocks = u32::try_from(dev.block_count())
        .map_err(|_| VsfsError::Format("device exceeds the 32-bit block number space".to_owned()))?;
    let geo = Geometry::derive(num_blocks, opts.num_inodes).map_err(to_format_error)?;

    // Clean slate for every metadata block.
    let zeros = vec![0_u8; VSFS_BLOCK_SIZE as usize];
    for block in 0..geo.metadata_blocks() {
        dev.write_block(BlockNumber(block), &zeros)?;
    }

    let sb = Superblock {
        fs_size: u64::from(num_blocks) * u64::from(VSFS_BLOCK_SIZE),
        num_inodes: opts.num_inodes,
        free_inodes: opts.num_inodes - 1,
        num_blocks,
        free_blocks: num_blocks - geo.metadata_blocks(),
        data_region: geo.data_region_start,
    };
    let mut block0 = vec![0_u8; VSFS_BLOCK_SIZE as usize];
    sb.write_to_bytes(&mut block0)
        .map_err(|e| crate::corruption_at(BlockNumber(0), &e))?;
    dev.write_block(BlockNumber(0), &block0)?;

    // Root inode occupies slot 0; metadata blocks are never allocatable.
    let ibmap = BitmapRegion::new(geo.inode_bitmap_start, opts.num_inodes);
    ibmap.set(dev, VSFS_ROOT_INO.0)?;
    let dbmap = BitmapRegion::new(geo.data_bitmap_start, num_blocks);
    for block in 0..geo.metadata_blocks() {
        dbmap.set(dev, block)?;
    }

    let (sec, nsec) = now_parts();
    let root = Inode::new_root(sec, nsec);
    let (table_block, offset) = geo
        .inode_location(VSFS_ROOT_INO)
        .map_err(to_format_error)?;
    let mut buf = dev.read_block(table_block)?.into_inner();
    root.write_to_bytes(&mut buf[offset..offset + VSFS_INODE_SIZE])
        .map_err(|e| crate::corruption_at(table_block, &e))?;
    dev.write_block(table_block, &buf)?;

    dev.sync()?;
    debug!(
        num_blocks,
        num_inodes = opts.num_inodes,
        data_region = geo.data_region_start.0,
        "formatted image"
    );
    Ok(())
}
