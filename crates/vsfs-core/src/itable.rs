//! Inode table access.
//!
//! Inode records live packed in the table blocks; all access is whole-block
//! read/modify/write through the device, never ad-hoc byte offsets.

use crate::{Filesystem, corruption_at};
use vsfs_error::Result;
use vsfs_ondisk::Inode;
use vsfs_types::{InodeNumber, VSFS_INODE_SIZE};

impl Filesystem {
    /// Read one inode record.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Inode> {
        let (block, offset) = self
            .geo
            .inode_location(ino)
            .map_err(|e| corruption_at(self.geo.inode_table_start, &e))?;
        let buf = self.dev.read_block(block)?;
        Inode::parse_from_bytes(&buf.as_slice()[offset..offset + VSFS_INODE_SIZE])
            .map_err(|e| corruption_at(block, &e))
    }

    /// Write one inode record back to its table slot.
    pub(crate) fn write_inode(&mut self, ino: InodeNumber, inode: &Inode) -> Result<()> {
        let (block, offset) = self
            .geo
            .inode_location(ino)
            .map_err(|e| corruption_at(self.geo.inode_table_start, &e))?;
        let mut buf = self.dev.read_block(block)?.into_inner();
        inode
            .write_to_bytes(&mut buf[offset..offset + VSFS_INODE_SIZE])
            .map_err(|e| corruption_at(block, &e))?;
        self.dev.write_block(block, &buf)
    }

    /// Zero an inode's table slot after its bitmap bit is released.
    pub(crate) fn clear_inode(&mut self, ino: InodeNumber) -> Result<()> {
        let (block, offset) = self
            .geo
            .inode_location(ino)
            .map_err(|e| corruption_at(self.geo.inode_table_start, &e))?;
        let mut buf = self.dev.read_block(block)?.into_inner();
        buf[offset..offset + VSFS_INODE_SIZE].fill(0);
        self.dev.write_block(block, &buf)
    }
}
