//! Typed views over raw directory blocks.

use core::fmt;

use crate::structures::raw::{
    ENTRIES_PER_BLOCK, RawDirectoryEntry, RawDirectoryHeader, slot_offset,
};
use crate::structures::{name, time};
use sortdir_io::BlockBuf;

bitflags::bitflags! {
    /// ProDOS access byte.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const DESTROY = 0x80;
        const RENAME = 0x40;
        const BACKUP = 0x20;
        const WRITE = 0x02;
        const READ = 0x01;
    }
}

/// Storage type nibble from the high half of `type_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Seedling,
    Sapling,
    Tree,
    PascalArea,
    Extended,
    Subdirectory,
    SubdirectoryHeader,
    VolumeHeader,
}

impl StorageType {
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x1 => Some(Self::Seedling),
            0x2 => Some(Self::Sapling),
            0x3 => Some(Self::Tree),
            0x4 => Some(Self::PascalArea),
            0x5 => Some(Self::Extended),
            0xd => Some(Self::Subdirectory),
            0xe => Some(Self::SubdirectoryHeader),
            0xf => Some(Self::VolumeHeader),
            _ => None,
        }
    }

    /// Short label used in catalog rows.
    pub fn label(self) -> &'static str {
        match self {
            Self::Seedling => "Seed",
            Self::Sapling => "Sapl",
            Self::Tree => "Tree",
            Self::PascalArea => "Pasc",
            Self::Extended => "Fork",
            Self::Subdirectory => "Dir ",
            Self::SubdirectoryHeader | Self::VolumeHeader => "Hdr ",
        }
    }
}

/// Forward link in bytes 2-3 of a directory block (0 for the last block).
pub fn next_link(block: &BlockBuf) -> u16 {
    u16::from_le_bytes([block[2], block[3]])
}

pub fn set_next_link(block: &mut BlockBuf, next: u16) {
    block[2..4].copy_from_slice(&next.to_le_bytes());
}

/// Back link in bytes 0-1 (0 for the key block).
pub fn prev_link(block: &BlockBuf) -> u16 {
    u16::from_le_bytes([block[0], block[1]])
}

pub fn header(block: &BlockBuf) -> &RawDirectoryHeader {
    bytemuck::from_bytes(&block[slot_offset(1)..slot_offset(2)])
}

pub fn header_mut(block: &mut BlockBuf) -> &mut RawDirectoryHeader {
    bytemuck::from_bytes_mut(&mut block[slot_offset(1)..slot_offset(2)])
}

/// Entry in slot `slot` (1-based). Slot 1 of a key block is the header and
/// must not be viewed through this.
pub fn entry(block: &BlockBuf, slot: usize) -> &RawDirectoryEntry {
    debug_assert!((1..=ENTRIES_PER_BLOCK).contains(&slot));
    bytemuck::from_bytes(&block[slot_offset(slot)..slot_offset(slot + 1)])
}

pub fn entry_mut(block: &mut BlockBuf, slot: usize) -> &mut RawDirectoryEntry {
    debug_assert!((1..=ENTRIES_PER_BLOCK).contains(&slot));
    bytemuck::from_bytes_mut(&mut block[slot_offset(slot)..slot_offset(slot + 1)])
}

impl RawDirectoryHeader {
    pub fn storage_type(&self) -> Option<StorageType> {
        StorageType::from_nibble(self.type_len >> 4)
    }

    pub fn name_len(&self) -> u8 {
        self.type_len & 0x0f
    }

    pub fn decoded_name(&self) -> String {
        name::decode(&self.name, self.name_len(), self.version, self.min_version)
    }

    pub fn file_count(&self) -> u16 {
        u16::from_le_bytes(self.file_count)
    }

    pub fn set_file_count(&mut self, count: u16) {
        self.file_count = count.to_le_bytes();
    }

    pub fn parent_block(&self) -> u16 {
        u16::from_le_bytes(self.parent_block)
    }

    pub fn set_parent(&mut self, block: u16, entry: u8) {
        self.parent_block = block.to_le_bytes();
        self.parent_entry = entry;
    }

    /// Volume bitmap pointer (volume directory headers only).
    pub fn bitmap_block(&self) -> u16 {
        u16::from_le_bytes(self.parent_block)
    }

    /// Total volume blocks (volume directory headers only).
    pub fn total_blocks(&self) -> u16 {
        u16::from_le_bytes([self.parent_entry, self.parent_entry_size])
    }
}

impl RawDirectoryEntry {
    /// A slot is live when `type_len` is non-zero; deleted and never-used
    /// slots are indistinguishable.
    pub fn is_live(&self) -> bool {
        self.type_len != 0
    }

    pub fn storage_type(&self) -> Option<StorageType> {
        StorageType::from_nibble(self.type_len >> 4)
    }

    pub fn storage_nibble(&self) -> u8 {
        self.type_len >> 4
    }

    pub fn name_len(&self) -> u8 {
        self.type_len & 0x0f
    }

    pub fn decoded_name(&self) -> String {
        name::decode(&self.name, self.name_len(), self.version, self.min_version)
    }

    pub fn key_block(&self) -> u16 {
        u16::from_le_bytes(self.key_block)
    }

    pub fn blocks_used(&self) -> u16 {
        u16::from_le_bytes(self.blocks_used)
    }

    pub fn set_blocks_used(&mut self, blocks: u16) {
        self.blocks_used = blocks.to_le_bytes();
    }

    pub fn eof(&self) -> u32 {
        u32::from_le_bytes([self.eof[0], self.eof[1], self.eof[2], 0])
    }

    pub fn aux_type(&self) -> u16 {
        u16::from_le_bytes(self.aux_type)
    }

    pub fn access(&self) -> Access {
        Access::from_bits_retain(self.access)
    }

    pub fn header_block(&self) -> u16 {
        u16::from_le_bytes(self.header_block)
    }

    pub fn set_header_block(&mut self, block: u16) {
        self.header_block = block.to_le_bytes();
    }
}

/// One catalog row: storage label, name, blocks, EOF, type, aux, access,
/// creation and modification stamps.
pub struct CatalogRow<'a>(pub &'a RawDirectoryEntry);

fn fmt_stamp(raw: [u8; 4]) -> String {
    match time::parse(raw) {
        Some(dt) => dt.to_string(),
        None => "<no date>".to_string(),
    }
}

impl fmt::Display for CatalogRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ent = self.0;
        let label = match ent.storage_type() {
            Some(st) => st.label(),
            None => "????",
        };
        write!(
            f,
            "{}  {:<15} {:>5}  {:>8}  ${:02X}  ${:04X}  ${:02X}  {:>16}  {:>16}",
            label,
            ent.decoded_name(),
            ent.blocks_used(),
            ent.eof(),
            ent.file_type,
            ent.aux_type(),
            ent.access().bits(),
            fmt_stamp(ent.creation),
            fmt_stamp(ent.modification),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with_entry(slot: usize, f: impl FnOnce(&mut RawDirectoryEntry)) -> BlockBuf {
        let mut block = [0u8; 512];
        f(entry_mut(&mut block, slot));
        block
    }

    #[test]
    fn links() {
        let mut block = [0u8; 512];
        block[0] = 0x34;
        block[1] = 0x12;
        set_next_link(&mut block, 0x5678);
        assert_eq!(prev_link(&block), 0x1234);
        assert_eq!(next_link(&block), 0x5678);
        assert_eq!(block[2], 0x78);
        assert_eq!(block[3], 0x56);
    }

    #[test]
    fn entry_views_are_disjoint_per_slot() {
        let block = block_with_entry(3, |ent| {
            ent.type_len = 0x15;
            ent.key_block = 42u16.to_le_bytes();
        });
        assert!(!entry(&block, 2).is_live());
        assert!(entry(&block, 3).is_live());
        assert_eq!(entry(&block, 3).key_block(), 42);
        assert_eq!(entry(&block, 3).storage_type(), Some(StorageType::Seedling));
        assert!(!entry(&block, 4).is_live());
    }

    #[test]
    fn volume_header_overlays() {
        let mut block = [0u8; 512];
        let hdr = header_mut(&mut block);
        hdr.type_len = 0xf3;
        hdr.parent_block = 6u16.to_le_bytes();
        hdr.parent_entry = 0x18;
        hdr.parent_entry_size = 0x01;
        let hdr = header(&block);
        assert_eq!(hdr.storage_type(), Some(StorageType::VolumeHeader));
        assert_eq!(hdr.bitmap_block(), 6);
        assert_eq!(hdr.total_blocks(), 280);
    }
}
