#![forbid(unsafe_code)]
//! Device layer for vsfs images.
//!
//! Provides the [`ByteDevice`] and [`BlockDevice`] traits, a bounds-checked
//! [`ByteBlockDevice`] adapter, a file-backed device using pread/pwrite
//! style I/O, and a shared in-memory device for tests.
//!
//! There is no caching or write buffering anywhere in this layer: every
//! write lands in the backing store before the call returns, so a
//! successful operation's effects are immediately visible to the next one.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use vsfs_error::{Result, VsfsError};
use vsfs_types::{BlockNumber, VSFS_BLOCK_SIZE};

/// Owned block buffer.
///
/// Invariant: length == device block size for the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device with pread/pwrite semantics.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn check_range(offset: u64, len: usize, device_len: u64, what: &str) -> Result<()> {
    let len_u64 =
        u64::try_from(len).map_err(|_| VsfsError::Format(format!("{what} length overflows u64")))?;
    let end = offset
        .checked_add(len_u64)
        .ok_or_else(|| VsfsError::Format(format!("{what} range overflows u64")))?;
    if end > device_len {
        return Err(VsfsError::Format(format!(
            "{what} out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// File-backed byte device using `std::os::unix::fs::FileExt`, which is
/// thread-safe and does not require a shared seek position.
///
/// Falls back to read-only mode when the image cannot be opened writable;
/// writes then fail with [`VsfsError::ReadOnly`].
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len, "read")?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(VsfsError::ReadOnly);
        }
        check_range(offset, buf.len(), self.len, "write")?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Shared in-memory byte device.
///
/// The mutex exists only because `ByteDevice` takes `&self`; the engine
/// itself is single-caller.
#[derive(Debug, Clone, Default)]
pub struct MemByteDevice {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemByteDevice {
    /// Create a zero-filled device of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0_u8; len])),
        }
    }

    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Copy of the full backing store, for test assertions.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let start = usize::try_from(offset)
            .map_err(|_| VsfsError::Format("offset overflows usize".to_owned()))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| VsfsError::Format("read range overflow".to_owned()))?;
        if end > bytes.len() {
            return Err(VsfsError::Format(format!(
                "read out of bounds: offset={offset} len={} device_len={}",
                buf.len(),
                bytes.len()
            )));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let start = usize::try_from(offset)
            .map_err(|_| VsfsError::Format("offset overflows usize".to_owned()))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| VsfsError::Format("write range overflow".to_owned()))?;
        if end > bytes.len() {
            return Err(VsfsError::Format(format!(
                "write out of bounds: offset={offset} len={} device_len={}",
                buf.len(),
                bytes.len()
            )));
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Block-addressed I/O interface.
///
/// All engine components address the image exclusively through block
/// numbers; ad-hoc byte offsets never leave this layer.
pub trait BlockDevice: Send + Sync {
    /// Read a block by number.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Write a block by number. `data.len()` MUST equal `block_size()`.
    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()>;

    /// Device block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of blocks.
    fn block_count(&self) -> u64;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// Adapter presenting a [`ByteDevice`] as a [`BlockDevice`] with
/// bounds-checked block-number access.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    /// Wrap a byte device. The device length must be a whole number of
    /// vsfs blocks.
    pub fn new(inner: D) -> Result<Self> {
        let len = inner.len_bytes();
        let block_size = u64::from(VSFS_BLOCK_SIZE);
        if len % block_size != 0 {
            return Err(VsfsError::Format(format!(
                "image length is not block-aligned: len_bytes={len} block_size={block_size}"
            )));
        }
        Ok(Self {
            inner,
            block_count: len / block_size,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if u64::from(block.0) >= self.block_count {
            return Err(VsfsError::Format(format!(
                "block out of range: block={block} block_count={}",
                self.block_count
            )));
        }
        let mut buf = vec![0_u8; VSFS_BLOCK_SIZE as usize];
        self.inner.read_exact_at(block.to_byte_offset(), &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        if u64::from(block.0) >= self.block_count {
            return Err(VsfsError::Format(format!(
                "block out of range: block={block} block_count={}",
                self.block_count
            )));
        }
        if data.len() != VSFS_BLOCK_SIZE as usize {
            return Err(VsfsError::Format(format!(
                "write_block data size mismatch: got={} expected={VSFS_BLOCK_SIZE}",
                data.len()
            )));
        }
        self.inner.write_all_at(block.to_byte_offset(), data)
    }

    fn block_size(&self) -> u32 {
        VSFS_BLOCK_SIZE
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

/// Convenience: an in-memory block device of `blocks` zeroed blocks.
pub fn mem_block_device(blocks: u32) -> ByteBlockDevice<MemByteDevice> {
    let dev = MemByteDevice::new(blocks as usize * VSFS_BLOCK_SIZE as usize);
    ByteBlockDevice::new(dev).expect("zero-filled device is block-aligned")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_roundtrip() {
        let dev = mem_block_device(4);
        let mut data = vec![0_u8; VSFS_BLOCK_SIZE as usize];
        data[0] = 0xAB;
        data[4095] = 0xCD;
        dev.write_block(BlockNumber(2), &data).unwrap();
        let back = dev.read_block(BlockNumber(2)).unwrap();
        assert_eq!(back.as_slice(), data.as_slice());
        // Neighboring blocks stay zero.
        assert!(
            dev.read_block(BlockNumber(1))
                .unwrap()
                .as_slice()
                .iter()
                .all(|b| *b == 0)
        );
    }

    #[test]
    fn block_out_of_range_is_rejected() {
        let dev = mem_block_device(2);
        let err = dev.read_block(BlockNumber(2)).unwrap_err();
        assert!(matches!(err, VsfsError::Format(_)));
        let data = vec![0_u8; VSFS_BLOCK_SIZE as usize];
        assert!(dev.write_block(BlockNumber(9), &data).is_err());
    }

    #[test]
    fn short_write_buffer_is_rejected() {
        let dev = mem_block_device(2);
        let err = dev.write_block(BlockNumber(0), &[0_u8; 17]).unwrap_err();
        assert!(matches!(err, VsfsError::Format(_)));
    }

    #[test]
    fn unaligned_image_is_rejected() {
        let dev = MemByteDevice::new(VSFS_BLOCK_SIZE as usize + 1);
        assert!(ByteBlockDevice::new(dev).is_err());
    }
}
