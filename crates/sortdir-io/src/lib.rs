//! Block device abstraction for the sortdir crates.
//!
//! ProDOS addresses media as 512-byte blocks. Everything above this crate
//! works in whole blocks; byte-level access never crosses a block boundary.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of one device block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// A single block buffer.
pub type BlockBuf = [u8; BLOCK_SIZE];

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The block number lies beyond the end of the device.
    #[error("block {block} is out of range (device has {total} blocks)")]
    OutOfRange { block: u32, total: u32 },

    /// The underlying medium failed.
    #[error("i/o failed on block {block}: {source}")]
    Io {
        block: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Random access to a volume of 512-byte blocks.
///
/// Implementations must make a completed `write_block` durable; there is no
/// separate flush primitive.
pub trait BlockDevice {
    /// Number of addressable blocks on the device.
    fn total_blocks(&self) -> u32;

    fn read_block(&mut self, block: u32, buffer: &mut BlockBuf) -> Result<(), DeviceError>;

    fn write_block(&mut self, block: u32, buffer: &BlockBuf) -> Result<(), DeviceError>;
}

impl BlockDevice for &mut [u8] {
    fn total_blocks(&self) -> u32 {
        (self.len() / BLOCK_SIZE) as u32
    }

    fn read_block(&mut self, block: u32, buffer: &mut BlockBuf) -> Result<(), DeviceError> {
        let offset = block as usize * BLOCK_SIZE;
        if offset + BLOCK_SIZE > self.len() {
            return Err(DeviceError::OutOfRange {
                block,
                total: self.total_blocks(),
            });
        }
        buffer.copy_from_slice(&self[offset..offset + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&mut self, block: u32, buffer: &BlockBuf) -> Result<(), DeviceError> {
        let offset = block as usize * BLOCK_SIZE;
        if offset + BLOCK_SIZE > self.len() {
            return Err(DeviceError::OutOfRange {
                block,
                total: self.total_blocks(),
            });
        }
        self[offset..offset + BLOCK_SIZE].copy_from_slice(buffer);
        Ok(())
    }
}

/// A raw volume image on the host filesystem (`.po` block order).
///
/// The file is kept open for the whole session and accessed with positioned
/// reads and writes.
pub struct ImageFile {
    file: File,
    total_blocks: u32,
}

impl ImageFile {
    /// Opens an image read-only or read-write. The image length must be a
    /// whole number of blocks.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> std::io::Result<Self> {
        let file = File::options().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("image length {len} is not a multiple of {BLOCK_SIZE}"),
            ));
        }
        Ok(Self {
            file,
            total_blocks: (len / BLOCK_SIZE as u64) as u32,
        })
    }

    fn seek_to(&mut self, block: u32) -> Result<(), DeviceError> {
        self.file
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))
            .map(drop)
            .map_err(|source| DeviceError::Io { block, source })
    }
}

impl BlockDevice for ImageFile {
    fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    fn read_block(&mut self, block: u32, buffer: &mut BlockBuf) -> Result<(), DeviceError> {
        if block >= self.total_blocks {
            return Err(DeviceError::OutOfRange {
                block,
                total: self.total_blocks,
            });
        }
        self.seek_to(block)?;
        self.file
            .read_exact(buffer)
            .map_err(|source| DeviceError::Io { block, source })
    }

    fn write_block(&mut self, block: u32, buffer: &BlockBuf) -> Result<(), DeviceError> {
        if block >= self.total_blocks {
            return Err(DeviceError::OutOfRange {
                block,
                total: self.total_blocks,
            });
        }
        self.seek_to(block)?;
        self.file
            .write_all(buffer)
            .map_err(|source| DeviceError::Io { block, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_round_trip() {
        let mut backing = vec![0u8; 4 * BLOCK_SIZE];
        let mut dev: &mut [u8] = backing.as_mut_slice();
        assert_eq!(dev.total_blocks(), 4);

        let mut block = [0xA5u8; BLOCK_SIZE];
        dev.write_block(2, &block).unwrap();
        block = [0u8; BLOCK_SIZE];
        dev.read_block(2, &mut block).unwrap();
        assert_eq!(block, [0xA5u8; BLOCK_SIZE]);
    }

    #[test]
    fn slice_out_of_range() {
        let mut backing = vec![0u8; 2 * BLOCK_SIZE];
        let mut dev: &mut [u8] = backing.as_mut_slice();
        let mut block = [0u8; BLOCK_SIZE];
        assert!(matches!(
            dev.read_block(2, &mut block),
            Err(DeviceError::OutOfRange { block: 2, total: 2 })
        ));
    }

    #[test]
    fn image_file_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; 8 * BLOCK_SIZE]).unwrap();
        tmp.flush().unwrap();

        let mut img = ImageFile::open(tmp.path(), true).unwrap();
        assert_eq!(img.total_blocks(), 8);

        let block = [0x5Au8; BLOCK_SIZE];
        img.write_block(7, &block).unwrap();
        let mut back = [0u8; BLOCK_SIZE];
        img.read_block(7, &mut back).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn image_file_rejects_partial_block() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; BLOCK_SIZE + 17]).unwrap();
        tmp.flush().unwrap();
        assert!(ImageFile::open(tmp.path(), false).is_err());
    }
}
