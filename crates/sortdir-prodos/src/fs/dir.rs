//! Directory chain reading and per-entry verification.

use crate::fs::{EngineError, Session, rule, walker};
use crate::structures::directory::{
    CatalogRow, StorageType, entry, entry_mut, header, header_mut, next_link,
};
use crate::structures::raw::{ENTRIES_PER_BLOCK, ENTRY_SIZE, NAME_LEN};
use crate::structures::{name, time};
use sortdir_io::{BLOCK_SIZE, BlockBuf};

/// One block of a directory, remembered by its on-disk number.
pub struct DirBlock {
    pub number: u32,
    pub data: BlockBuf,
}

/// A whole directory held in memory as a contiguous block list (index =
/// position in the chain).
pub struct DirectoryImage {
    pub key_block: u32,
    pub name: String,
    pub is_volume: bool,
    pub blocks: Vec<DirBlock>,
    pub live_entries: u16,
    /// Key blocks of subdirectories, in entry order.
    pub subdirs: Vec<u32>,
    /// Errors attributed to reading this directory.
    pub errors: u32,
}

impl DirectoryImage {
    /// Live entries the current block count can hold: the key block loses
    /// one slot to the header.
    pub fn capacity(&self) -> usize {
        (ENTRIES_PER_BLOCK - 1) + (self.blocks.len() - 1) * ENTRIES_PER_BLOCK
    }

    /// First usable entry slot of block `index` (1-based slots).
    pub(crate) fn first_slot(index: usize) -> usize {
        if index == 0 { 2 } else { 1 }
    }
}

/// Reads and verifies one directory. `Ok(None)` means the directory failed
/// validation and was skipped; the traversal carries on with the next one.
pub fn read_directory(
    sess: &mut Session<'_>,
    key_block: u32,
) -> Result<Option<DirectoryImage>, EngineError> {
    let errors_before = sess.errors();
    sess.check_block(key_block, "Directory");

    let mut buf = [0u8; BLOCK_SIZE];
    sess.dev.read(key_block, &mut buf)?;

    let hdr = header(&buf);
    let is_volume = match hdr.storage_type() {
        Some(StorageType::VolumeHeader) => true,
        Some(StorageType::SubdirectoryHeader) => false,
        _ => {
            sess.report(format_args!("Bad storage type in dir blk {key_block}"));
            return Ok(None);
        }
    };
    let dir_name = hdr.decoded_name();
    let file_count = hdr.file_count();
    sess.dev.set_directory_name(&dir_name);

    rule('=');
    println!(
        "Directory {dir_name} ({file_count} {})",
        if file_count == 1 { "entry" } else { "entries" }
    );
    rule('-');

    if hdr.entry_size as usize != ENTRY_SIZE {
        sess.report(format_args!("Bad entry size in dir {dir_name}"));
        return Ok(None);
    }
    if hdr.entries_per_block as usize != ENTRIES_PER_BLOCK {
        sess.report(format_args!("Bad entries/block in dir {dir_name}"));
        return Ok(None);
    }

    let mut blocks: Vec<DirBlock> = Vec::new();
    let mut subdirs: Vec<u32> = Vec::new();
    let mut live_entries: u16 = 0;
    let mut block_num = key_block;

    loop {
        let first_slot = DirectoryImage::first_slot(blocks.len());
        for slot in first_slot..=ENTRIES_PER_BLOCK {
            if entry(&buf, slot).is_live() {
                scan_entry(sess, &mut buf, slot, key_block, block_num, &mut subdirs)?;
                live_entries += 1;
            }
        }
        let next = next_link(&buf);
        blocks.push(DirBlock {
            number: block_num,
            data: buf,
        });
        if next == 0 {
            break;
        }
        if blocks.len() as u32 > sess.total_blocks {
            sess.report(format_args!("Directory {dir_name} chain loops"));
            return Ok(None);
        }
        block_num = next as u32;
        sess.check_block(block_num, "Directory");
        sess.dev.read(block_num, &mut buf)?;
    }

    if file_count != live_entries {
        sess.report(format_args!(
            "Filecount {file_count} wrong, should be {live_entries}"
        ));
        if sess.ask_fix("file count") {
            header_mut(&mut blocks[0].data).set_file_count(live_entries);
        }
    }

    Ok(Some(DirectoryImage {
        key_block,
        name: dir_name,
        is_volume,
        blocks,
        live_entries,
        subdirs,
        errors: sess.errors() - errors_before,
    }))
}

/// Applies the configured rewrites to one live entry, walks its storage and
/// cross-checks the entry fields against what the walk found.
fn scan_entry(
    sess: &mut Session<'_>,
    buf: &mut BlockBuf,
    slot: usize,
    key_block: u32,
    block_num: u32,
    subdirs: &mut Vec<u32>,
) -> Result<(), EngineError> {
    if let Some(transform) = sess.opts.case_transform {
        let ent = entry_mut(buf, slot);
        let (version, min_version) = name::encode(&ent.name, ent.name_len(), transform);
        ent.version = version;
        ent.min_version = min_version;
    }
    if let Some(format) = sess.opts.date_format {
        let ent = entry_mut(buf, slot);
        time::convert(&mut ent.creation, format.is_pd25());
        time::convert(&mut ent.modification, format.is_pd25());
    }

    let ent = entry(buf, slot);
    let ent_name = ent.decoded_name();
    let raw_name = ent.name;
    let storage = ent.storage_type();
    let storage_nibble = ent.storage_nibble();
    let file_key = ent.key_block() as u32;
    let header_ptr = ent.header_block();
    let blocks_used = ent.blocks_used() as u32;

    let count = match storage {
        Some(StorageType::Seedling) => walker::seedling(sess, file_key)?,
        Some(StorageType::Sapling) => walker::sapling(sess, file_key)?,
        Some(StorageType::Tree) => walker::tree(sess, file_key)?,
        Some(StorageType::Extended) => walker::fork(sess, file_key)?,
        Some(StorageType::PascalArea) => {
            println!("  {ent_name}: Pascal area");
            0
        }
        Some(StorageType::Subdirectory) => {
            subdirs.push(file_key);
            subdir_blocks(sess, &raw_name, file_key, block_num, slot)?
        }
        _ => {
            sess.report(format_args!(
                "{ent_name}: unexpected storage type 0x{storage_nibble:x}"
            ));
            0
        }
    };

    if header_ptr as u32 != key_block {
        sess.report(format_args!(
            "Header ptr {header_ptr}, should be {key_block}"
        ));
        if sess.ask_fix("header pointer") {
            entry_mut(buf, slot).set_header_block(key_block as u16);
        }
    }
    if count != 0 && blocks_used != count {
        sess.report(format_args!(
            "Blks used {blocks_used} is incorrect, should be {count}"
        ));
        if sess.ask_fix("blocks used") {
            entry_mut(buf, slot).set_blocks_used(count as u16);
        }
    }

    println!("{}", CatalogRow(entry(buf, slot)));
    Ok(())
}

/// Counts a child directory's chain for the parent entry's `blocks_used`
/// and verifies the child's back-pointers. Repairs to the child header are
/// flushed immediately so an interrupted run stays consistent.
fn subdir_blocks(
    sess: &mut Session<'_>,
    entry_name: &[u8; NAME_LEN],
    child_key: u32,
    parent_block: u32,
    parent_slot: usize,
) -> Result<u32, EngineError> {
    // When recursing, the child's own visit accounts for its blocks.
    let mark = !sess.opts.scope.recurses();
    if mark {
        sess.check_block(child_key, "Directory");
    }
    let mut buf = [0u8; BLOCK_SIZE];
    sess.dev.read(child_key, &mut buf)?;

    let mut fixed = false;
    let hdr = header(&buf);
    let child_parent = hdr.parent_block() as u32;
    let child_entry = hdr.parent_entry;
    let child_entry_size = hdr.parent_entry_size;

    if child_parent != parent_block {
        sess.report(format_args!(
            "Bad parent blk {child_parent}, should be {parent_block}"
        ));
        if sess.ask_fix("parent block") {
            header_mut(&mut buf).parent_block = (parent_block as u16).to_le_bytes();
            fixed = true;
        }
    }
    if child_entry as usize != parent_slot {
        sess.report(format_args!(
            "Bad parent blk entry {child_entry}, should be {parent_slot}"
        ));
        if sess.ask_fix("parent entry") {
            header_mut(&mut buf).parent_entry = parent_slot as u8;
            fixed = true;
        }
    }
    if child_entry_size as usize != ENTRY_SIZE {
        sess.report(format_args!("Bad parent entry length"));
        if sess.ask_fix("parent entry length") {
            header_mut(&mut buf).parent_entry_size = ENTRY_SIZE as u8;
            fixed = true;
        }
    }
    if header(&buf).name != *entry_name {
        sess.report(format_args!("Subdir name mismatch"));
    }
    if fixed && sess.opts.write_enabled {
        sess.dev.write(child_key, &buf)?;
    }

    let mut count = 1;
    let mut next = next_link(&buf);
    while next != 0 {
        if count > sess.total_blocks {
            sess.report(format_args!("Subdir chain at blk {child_key} loops"));
            break;
        }
        if mark {
            sess.check_block(next as u32, "Directory");
        }
        sess.dev.read(next as u32, &mut buf)?;
        count += 1;
        next = next_link(&buf);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_accounts_for_the_header_slot() {
        let image = DirectoryImage {
            key_block: 2,
            name: "VOL".into(),
            is_volume: true,
            blocks: (0..4)
                .map(|i| DirBlock {
                    number: 2 + i,
                    data: [0u8; BLOCK_SIZE],
                })
                .collect(),
            live_entries: 0,
            subdirs: Vec::new(),
            errors: 0,
        };
        assert_eq!(image.capacity(), 12 + 3 * 13);
        assert_eq!(DirectoryImage::first_slot(0), 2);
        assert_eq!(DirectoryImage::first_slot(1), 1);
    }
}
