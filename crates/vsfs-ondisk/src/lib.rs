#![forbid(unsafe_code)]
//! On-disk structure codecs for vsfs.
//!
//! The image is partitioned in fixed order: superblock block, inode bitmap
//! block(s), data bitmap block(s), inode table blocks, data region. This
//! crate owns the byte layout of the superblock, inode records, and
//! directory entries, plus the [`Geometry`] derivation that places each
//! region.
//!
//! Sentinel values (`VSFS_BLK_UNASSIGNED`, `VSFS_INO_FREE`) exist only on
//! disk; parsed structures represent empty slots as `None`.

use serde::{Deserialize, Serialize};
use vsfs_types::{
    BlockNumber, FileKind, InodeNumber, ParseError, S_IFDIR, VSFS_BLOCK_SIZE, VSFS_DENTRY_SIZE,
    VSFS_INO_FREE, VSFS_INODE_SIZE, VSFS_INODES_PER_BLOCK, VSFS_MAGIC, VSFS_NAME_MAX,
    VSFS_NUM_DIRECT, decode_block_ptr, div_round_up, encode_block_ptr, ensure_slice,
    name_from_nul_padded, read_le_i64, read_le_u32, read_le_u64, write_le_i64, write_le_u32,
    write_le_u64,
};

/// Bytes of the superblock actually encoded (the rest of block 0 is zero).
pub const SUPERBLOCK_SIZE: usize = 36;

// ── Superblock ──────────────────────────────────────────────────────────────

/// Aggregate counts for the whole image, block 0.
///
/// Mutated by every allocation and free; `free_* <= num_*` always holds,
/// and each free count equals the number of zero bits in its bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// Image size in bytes.
    pub fs_size: u64,
    /// Total inode slots.
    pub num_inodes: u32,
    /// Free inode slots.
    pub free_inodes: u32,
    /// Total blocks in the image, metadata included.
    pub num_blocks: u32,
    /// Free data blocks.
    pub free_blocks: u32,
    /// First block after the inode table.
    pub data_region: BlockNumber,
}

impl Superblock {
    /// Parse and magic-check a superblock from the start of block 0.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u64(bytes, 0x00)?;
        if magic != VSFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: VSFS_MAGIC,
                actual: magic,
            });
        }
        Ok(Self {
            fs_size: read_le_u64(bytes, 0x08)?,
            num_inodes: read_le_u32(bytes, 0x10)?,
            free_inodes: read_le_u32(bytes, 0x14)?,
            num_blocks: read_le_u32(bytes, 0x18)?,
            free_blocks: read_le_u32(bytes, 0x1C)?,
            data_region: BlockNumber(read_le_u32(bytes, 0x20)?),
        })
    }

    /// Encode into the start of a block-sized buffer.
    pub fn write_to_bytes(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        write_le_u64(bytes, 0x00, VSFS_MAGIC)?;
        write_le_u64(bytes, 0x08, self.fs_size)?;
        write_le_u32(bytes, 0x10, self.num_inodes)?;
        write_le_u32(bytes, 0x14, self.free_inodes)?;
        write_le_u32(bytes, 0x18, self.num_blocks)?;
        write_le_u32(bytes, 0x1C, self.free_blocks)?;
        write_le_u32(bytes, 0x20, self.data_region.0)?;
        Ok(())
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// One inode record (64 bytes on disk).
///
/// `blocks` counts data blocks only; the indirect pointer block is tracked
/// by `indirect` and never included. Invariant after every mutating
/// operation: `blocks == ceil(size / block_size)`, and `indirect` is
/// `Some` exactly when `blocks > VSFS_NUM_DIRECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    /// File type and permission bits.
    pub mode: u32,
    /// Hard link count (1 for files, 2 for the root directory).
    pub nlink: u32,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time, seconds since the epoch.
    pub mtime_sec: i64,
    /// Nanosecond part of the modification time.
    pub mtime_nsec: u32,
    /// Allocated data blocks, excluding the indirect pointer block.
    pub blocks: u32,
    /// Direct block pointers.
    pub direct: [Option<BlockNumber>; VSFS_NUM_DIRECT as usize],
    /// Singly-indirect pointer block.
    pub indirect: Option<BlockNumber>,
}

impl Inode {
    /// A freshly created empty regular file.
    #[must_use]
    pub fn new_file(mode: u32, mtime_sec: i64, mtime_nsec: u32) -> Self {
        Self {
            mode,
            nlink: 1,
            size: 0,
            mtime_sec,
            mtime_nsec,
            blocks: 0,
            direct: [None; VSFS_NUM_DIRECT as usize],
            indirect: None,
        }
    }

    /// The root directory inode as written at format time.
    #[must_use]
    pub fn new_root(mtime_sec: i64, mtime_nsec: u32) -> Self {
        Self {
            mode: S_IFDIR | 0o777,
            nlink: 2,
            size: 0,
            mtime_sec,
            mtime_nsec,
            blocks: 0,
            direct: [None; VSFS_NUM_DIRECT as usize],
            indirect: None,
        }
    }

    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < VSFS_INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: VSFS_INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        let mut direct = [None; VSFS_NUM_DIRECT as usize];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = decode_block_ptr(read_le_u32(bytes, 0x20 + i * 4)?);
        }
        Ok(Self {
            mode: read_le_u32(bytes, 0x00)?,
            nlink: read_le_u32(bytes, 0x04)?,
            size: read_le_u64(bytes, 0x08)?,
            mtime_sec: read_le_i64(bytes, 0x10)?,
            mtime_nsec: read_le_u32(bytes, 0x18)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            direct,
            indirect: decode_block_ptr(read_le_u32(bytes, 0x34)?),
        })
    }

    pub fn write_to_bytes(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        if bytes.len() < VSFS_INODE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: VSFS_INODE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        write_le_u32(bytes, 0x00, self.mode)?;
        write_le_u32(bytes, 0x04, self.nlink)?;
        write_le_u64(bytes, 0x08, self.size)?;
        write_le_i64(bytes, 0x10, self.mtime_sec)?;
        write_le_u32(bytes, 0x18, self.mtime_nsec)?;
        write_le_u32(bytes, 0x1C, self.blocks)?;
        for (i, slot) in self.direct.iter().enumerate() {
            write_le_u32(bytes, 0x20 + i * 4, encode_block_ptr(*slot))?;
        }
        write_le_u32(bytes, 0x34, encode_block_ptr(self.indirect))?;
        bytes[0x38..VSFS_INODE_SIZE].fill(0);
        Ok(())
    }

    pub fn kind(&self) -> Result<FileKind, ParseError> {
        FileKind::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self.kind(), Ok(FileKind::Directory))
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// A live directory entry: inode number plus decoded name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub ino: InodeNumber,
    pub name: String,
}

/// Parse one 256-byte entry slot. `None` means the slot is free.
pub fn parse_dentry(bytes: &[u8]) -> Result<Option<DirEntry>, ParseError> {
    let raw_ino = read_le_u32(bytes, 0)?;
    if raw_ino == VSFS_INO_FREE {
        return Ok(None);
    }
    let name_field = ensure_slice(bytes, 4, VSFS_NAME_MAX)?;
    Ok(Some(DirEntry {
        ino: InodeNumber(raw_ino),
        name: name_from_nul_padded(name_field),
    }))
}

/// Whether the slot holds a live entry with exactly this name.
pub fn dentry_matches(bytes: &[u8], name: &str) -> Result<bool, ParseError> {
    let raw_ino = read_le_u32(bytes, 0)?;
    if raw_ino == VSFS_INO_FREE {
        return Ok(false);
    }
    let field = ensure_slice(bytes, 4, VSFS_NAME_MAX)?;
    let needle = name.as_bytes();
    if needle.len() >= VSFS_NAME_MAX {
        return Ok(false);
    }
    // Stored names are NUL-terminated within the field.
    Ok(field[..needle.len()] == *needle && field[needle.len()] == 0)
}

/// Write a live entry into a 256-byte slot, NUL-padding the name.
///
/// The name must fit the field with its terminator; length validation is
/// the path resolver's job and is asserted here as a layout invariant.
pub fn write_dentry(bytes: &mut [u8], ino: InodeNumber, name: &str) -> Result<(), ParseError> {
    let name_bytes = name.as_bytes();
    if name_bytes.len() >= VSFS_NAME_MAX {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "exceeds the directory entry name field",
        });
    }
    if bytes.len() < VSFS_DENTRY_SIZE {
        return Err(ParseError::InsufficientData {
            needed: VSFS_DENTRY_SIZE,
            offset: 0,
            actual: bytes.len(),
        });
    }
    write_le_u32(bytes, 0, ino.0)?;
    bytes[4..4 + name_bytes.len()].copy_from_slice(name_bytes);
    bytes[4 + name_bytes.len()..VSFS_DENTRY_SIZE].fill(0);
    Ok(())
}

/// Reset a slot to the free state: sentinel inode number, name zeroed.
pub fn clear_dentry(bytes: &mut [u8]) -> Result<(), ParseError> {
    if bytes.len() < VSFS_DENTRY_SIZE {
        return Err(ParseError::InsufficientData {
            needed: VSFS_DENTRY_SIZE,
            offset: 0,
            actual: bytes.len(),
        });
    }
    write_le_u32(bytes, 0, VSFS_INO_FREE)?;
    bytes[4..VSFS_DENTRY_SIZE].fill(0);
    Ok(())
}

/// Format a whole block as an array of free directory entry slots.
///
/// A zeroed block would read as sixteen live entries for inode 0, so every
/// freshly allocated directory block must pass through here first.
pub fn format_dentry_block(block: &mut [u8]) -> Result<(), ParseError> {
    if block.len() < VSFS_BLOCK_SIZE as usize {
        return Err(ParseError::InsufficientData {
            needed: VSFS_BLOCK_SIZE as usize,
            offset: 0,
            actual: block.len(),
        });
    }
    for slot in block[..VSFS_BLOCK_SIZE as usize].chunks_exact_mut(VSFS_DENTRY_SIZE) {
        clear_dentry(slot)?;
    }
    Ok(())
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Placement of every metadata region, derived from the two totals.
///
/// Partition order is fixed: superblock, inode bitmap, data bitmap, inode
/// table, data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub num_blocks: u32,
    pub num_inodes: u32,
    pub inode_bitmap_start: BlockNumber,
    pub inode_bitmap_blocks: u32,
    pub data_bitmap_start: BlockNumber,
    pub data_bitmap_blocks: u32,
    pub inode_table_start: BlockNumber,
    pub inode_table_blocks: u32,
    pub data_region_start: BlockNumber,
}

impl Geometry {
    /// Derive region placement for an image of `num_blocks` blocks holding
    /// `num_inodes` inode slots.
    pub fn derive(num_blocks: u32, num_inodes: u32) -> Result<Self, ParseError> {
        if num_inodes == 0 {
            return Err(ParseError::InvalidField {
                field: "num_inodes",
                reason: "must be nonzero",
            });
        }
        let bits_per_block = u64::from(VSFS_BLOCK_SIZE) * 8;
        let inode_bitmap_blocks = block_count_u32(
            div_round_up(u64::from(num_inodes), bits_per_block),
            "inode_bitmap_blocks",
        )?;
        let data_bitmap_blocks = block_count_u32(
            div_round_up(u64::from(num_blocks), bits_per_block),
            "data_bitmap_blocks",
        )?;
        let inode_table_blocks = block_count_u32(
            div_round_up(
                u64::from(num_inodes) * VSFS_INODE_SIZE as u64,
                u64::from(VSFS_BLOCK_SIZE),
            ),
            "inode_table_blocks",
        )?;

        let inode_bitmap_start = BlockNumber(1);
        let data_bitmap_start = BlockNumber(inode_bitmap_start.0 + inode_bitmap_blocks);
        let inode_table_start = BlockNumber(data_bitmap_start.0 + data_bitmap_blocks);
        let data_region_start = BlockNumber(inode_table_start.0 + inode_table_blocks);

        if data_region_start.0 >= num_blocks {
            return Err(ParseError::InvalidField {
                field: "num_blocks",
                reason: "image too small for its metadata regions",
            });
        }

        Ok(Self {
            num_blocks,
            num_inodes,
            inode_bitmap_start,
            inode_bitmap_blocks,
            data_bitmap_start,
            data_bitmap_blocks,
            inode_table_start,
            inode_table_blocks,
            data_region_start,
        })
    }

    /// Inode table block and byte offset within it for an inode number.
    pub fn inode_location(&self, ino: InodeNumber) -> Result<(BlockNumber, usize), ParseError> {
        if ino.0 >= self.num_inodes {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "beyond the inode table",
            });
        }
        let block = BlockNumber(self.inode_table_start.0 + ino.0 / VSFS_INODES_PER_BLOCK);
        let offset = (ino.0 % VSFS_INODES_PER_BLOCK) as usize * VSFS_INODE_SIZE;
        Ok((block, offset))
    }

    /// Blocks occupied by metadata (everything before the data region).
    #[must_use]
    pub fn metadata_blocks(&self) -> u32 {
        self.data_region_start.0
    }
}

fn block_count_u32(value: u64, field: &'static str) -> Result<u32, ParseError> {
    u32::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsfs_types::{S_IFREG, VSFS_BLK_UNASSIGNED};

    #[test]
    fn superblock_roundtrip_and_magic_check() {
        let sb = Superblock {
            fs_size: 64 * 4096,
            num_inodes: 64,
            free_inodes: 63,
            num_blocks: 64,
            free_blocks: 60,
            data_region: BlockNumber(4),
        };
        let mut buf = vec![0_u8; VSFS_BLOCK_SIZE as usize];
        sb.write_to_bytes(&mut buf).unwrap();
        assert_eq!(Superblock::parse_from_bytes(&buf).unwrap(), sb);

        buf[0] ^= 0xFF;
        assert!(matches!(
            Superblock::parse_from_bytes(&buf),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn inode_roundtrip_preserves_sentinels() {
        let mut inode = Inode::new_file(S_IFREG | 0o644, 1_700_000_000, 123);
        inode.size = 5000;
        inode.blocks = 2;
        inode.direct[0] = Some(BlockNumber(10));
        inode.direct[1] = Some(BlockNumber(11));

        let mut buf = [0_u8; VSFS_INODE_SIZE];
        inode.write_to_bytes(&mut buf).unwrap();

        // Unassigned slots carry the on-disk sentinel.
        assert_eq!(read_le_u32(&buf, 0x28).unwrap(), VSFS_BLK_UNASSIGNED);
        assert_eq!(read_le_u32(&buf, 0x34).unwrap(), VSFS_BLK_UNASSIGNED);

        let parsed = Inode::parse_from_bytes(&buf).unwrap();
        assert_eq!(parsed, inode);
        assert_eq!(parsed.kind().unwrap(), FileKind::RegularFile);
    }

    #[test]
    fn inode_parse_rejects_short_buffer() {
        assert!(matches!(
            Inode::parse_from_bytes(&[0_u8; 32]),
            Err(ParseError::InsufficientData { .. })
        ));
    }

    #[test]
    fn dentry_slot_lifecycle() {
        let mut slot = [0_u8; VSFS_DENTRY_SIZE];
        clear_dentry(&mut slot).unwrap();
        assert_eq!(parse_dentry(&slot).unwrap(), None);
        assert!(!dentry_matches(&slot, "file.txt").unwrap());

        write_dentry(&mut slot, InodeNumber(3), "file.txt").unwrap();
        let entry = parse_dentry(&slot).unwrap().unwrap();
        assert_eq!(entry.ino, InodeNumber(3));
        assert_eq!(entry.name, "file.txt");
        assert!(dentry_matches(&slot, "file.txt").unwrap());
        // Prefixes must not match.
        assert!(!dentry_matches(&slot, "file.tx").unwrap());
        assert!(!dentry_matches(&slot, "file.txt2").unwrap());
    }

    #[test]
    fn dentry_name_length_limit() {
        let mut slot = [0_u8; VSFS_DENTRY_SIZE];
        let max_name = "x".repeat(VSFS_NAME_MAX - 1);
        write_dentry(&mut slot, InodeNumber(1), &max_name).unwrap();
        assert!(dentry_matches(&slot, &max_name).unwrap());

        let too_long = "x".repeat(VSFS_NAME_MAX);
        assert!(write_dentry(&mut slot, InodeNumber(1), &too_long).is_err());
    }

    #[test]
    fn formatted_dentry_block_is_all_free() {
        let mut block = vec![0_u8; VSFS_BLOCK_SIZE as usize];
        format_dentry_block(&mut block).unwrap();
        for slot in block.chunks_exact(VSFS_DENTRY_SIZE) {
            assert_eq!(parse_dentry(slot).unwrap(), None);
        }
    }

    #[test]
    fn geometry_small_image() {
        // 64 blocks, 64 inodes: 1 superblock + 1 inode bitmap + 1 data
        // bitmap + 1 inode table block.
        let geo = Geometry::derive(64, 64).unwrap();
        assert_eq!(geo.inode_bitmap_start, BlockNumber(1));
        assert_eq!(geo.data_bitmap_start, BlockNumber(2));
        assert_eq!(geo.inode_table_start, BlockNumber(3));
        assert_eq!(geo.data_region_start, BlockNumber(4));
        assert_eq!(geo.metadata_blocks(), 4);

        let (blk, off) = geo.inode_location(InodeNumber(0)).unwrap();
        assert_eq!((blk, off), (BlockNumber(3), 0));
        let (blk, off) = geo.inode_location(InodeNumber(63)).unwrap();
        assert_eq!((blk, off), (BlockNumber(3), 63 * VSFS_INODE_SIZE));
        assert!(geo.inode_location(InodeNumber(64)).is_err());
    }

    #[test]
    fn geometry_multi_block_inode_table() {
        // 256 inodes need 4 table blocks.
        let geo = Geometry::derive(128, 256).unwrap();
        assert_eq!(geo.inode_table_blocks, 4);
        assert_eq!(geo.data_region_start, BlockNumber(7));

        let (blk, off) = geo.inode_location(InodeNumber(64)).unwrap();
        assert_eq!((blk, off), (BlockNumber(4), 0));
    }

    #[test]
    fn geometry_rejects_degenerate_images() {
        assert!(Geometry::derive(3, 64).is_err());
        assert!(Geometry::derive(64, 0).is_err());
    }
}
