//! The addressing layer: logical file block index → physical block number.
//!
//! Logical index `i < 5` resolves through the inode's direct pointers;
//! higher indexes resolve through the array of block numbers stored in the
//! indirect pointer block. Every consumer of file data (read, write,
//! grow, shrink, directory scanning) goes through these three functions;
//! the direct/indirect branch exists nowhere else.

use crate::{Filesystem, corruption_at};
use vsfs_error::{Result, VsfsError};
use vsfs_ondisk::Inode;
use vsfs_types::{
    BlockNumber, VSFS_NUM_DIRECT, decode_block_ptr, encode_block_ptr, read_le_u32, write_le_u32,
};

fn indirect_slot_offset(idx: u32) -> usize {
    (idx - VSFS_NUM_DIRECT) as usize * 4
}

impl Filesystem {
    /// Physical block backing logical block `idx` of `inode`.
    ///
    /// `idx` must be below `inode.blocks`; an unassigned pointer inside
    /// that range is metadata corruption, not EOF.
    pub(crate) fn block_at(&self, inode: &Inode, idx: u32) -> Result<BlockNumber> {
        if idx >= inode.blocks {
            return Err(VsfsError::Corruption {
                block: 0,
                detail: format!(
                    "logical block {idx} beyond allocated count {}",
                    inode.blocks
                ),
            });
        }
        if idx < VSFS_NUM_DIRECT {
            return inode.direct[idx as usize].ok_or_else(|| VsfsError::Corruption {
                block: 0,
                detail: format!("direct pointer {idx} unassigned within file"),
            });
        }

        let indirect = inode.indirect.ok_or_else(|| VsfsError::Corruption {
            block: 0,
            detail: "indirect block unassigned but block count exceeds direct capacity".to_owned(),
        })?;
        let buf = self.dev.read_block(indirect)?;
        let raw = read_le_u32(buf.as_slice(), indirect_slot_offset(idx))
            .map_err(|e| corruption_at(indirect, &e))?;
        decode_block_ptr(raw).ok_or_else(|| VsfsError::Corruption {
            block: u64::from(indirect.0),
            detail: format!("indirect slot {} unassigned within file", idx - VSFS_NUM_DIRECT),
        })
    }

    /// Install `block` as logical block `idx`.
    ///
    /// Direct slots mutate the in-memory inode (the caller persists it);
    /// indirect slots are written straight into the indirect block, which
    /// must already be allocated.
    pub(crate) fn install_block(
        &mut self,
        inode: &mut Inode,
        idx: u32,
        block: BlockNumber,
    ) -> Result<()> {
        if idx < VSFS_NUM_DIRECT {
            inode.direct[idx as usize] = Some(block);
            return Ok(());
        }

        let indirect = inode.indirect.ok_or_else(|| VsfsError::Corruption {
            block: 0,
            detail: "installing an indirect slot without an indirect block".to_owned(),
        })?;
        let mut buf = self.dev.read_block(indirect)?.into_inner();
        write_le_u32(&mut buf, indirect_slot_offset(idx), block.0)
            .map_err(|e| corruption_at(indirect, &e))?;
        self.dev.write_block(indirect, &buf)
    }

    /// Reset the pointer slot for logical block `idx` to unassigned.
    pub(crate) fn clear_block_slot(&mut self, inode: &mut Inode, idx: u32) -> Result<()> {
        if idx < VSFS_NUM_DIRECT {
            inode.direct[idx as usize] = None;
            return Ok(());
        }

        let indirect = inode.indirect.ok_or_else(|| VsfsError::Corruption {
            block: 0,
            detail: "clearing an indirect slot without an indirect block".to_owned(),
        })?;
        let mut buf = self.dev.read_block(indirect)?.into_inner();
        write_le_u32(&mut buf, indirect_slot_offset(idx), encode_block_ptr(None))
            .map_err(|e| corruption_at(indirect, &e))?;
        self.dev.write_block(indirect, &buf)
    }
}
