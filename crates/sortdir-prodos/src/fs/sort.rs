//! Multi-level directory sorting and compaction.
//!
//! Sorting runs as one stable pass per key, left to right, so the last key
//! becomes the primary order and earlier keys survive as tie-breaks. Names
//! are unique within a directory; every other field relies on pass
//! stability for deterministic results.

use crate::fs::dir::DirectoryImage;
use crate::fs::{EngineError, Session, SortField, SortKey};
use crate::structures::directory::{entry, set_next_link};
use crate::structures::raw::{ENTRIES_PER_BLOCK, RawDirectoryEntry, slot_offset};
use crate::structures::time;
use crate::structures::StorageType;
use sortdir_io::{BLOCK_SIZE, BlockBuf};

const DIRECTORY_FILE_TYPE: u8 = 0x0f;

/// One live entry with every sortable field extracted up front; the key
/// chooses which field the comparator reads.
pub struct SortRecord {
    /// Position of the source block in the directory image.
    pub block_index: usize,
    /// Source slot within that block (1-based).
    pub slot: usize,
    name: String,
    name_folded: String,
    file_type: u8,
    is_dir: bool,
    creation: (u16, u8, u8, u8, u8),
    modification: (u16, u8, u8, u8, u8),
    blocks: u16,
    eof: u32,
}

fn stamp_key(raw: [u8; 4]) -> (u16, u8, u8, u8, u8) {
    time::parse(raw).map_or((0, 0, 0, 0, 0), |dt| dt.sort_key())
}

/// Extracts the sortable fields of every live entry, in on-disk order.
pub fn build_records(image: &DirectoryImage) -> Vec<SortRecord> {
    let mut records = Vec::with_capacity(image.live_entries as usize);
    for (block_index, block) in image.blocks.iter().enumerate() {
        for slot in DirectoryImage::first_slot(block_index)..=ENTRIES_PER_BLOCK {
            let ent = entry(&block.data, slot);
            if !ent.is_live() {
                continue;
            }
            let name = ent.decoded_name();
            records.push(SortRecord {
                block_index,
                slot,
                name_folded: name.to_ascii_uppercase(),
                name,
                file_type: ent.file_type,
                is_dir: ent.file_type == DIRECTORY_FILE_TYPE,
                creation: stamp_key(ent.creation),
                modification: stamp_key(ent.modification),
                blocks: ent.blocks_used(),
                eof: ent.eof(),
            });
        }
    }
    records
}

/// Applies the key list as successive stable passes.
pub fn apply_keys(records: &mut [SortRecord], keys: &[SortKey]) {
    for key in keys {
        if matches!(key.field, SortField::Unsorted) {
            continue;
        }
        let compare = |a: &SortRecord, b: &SortRecord| match key.field {
            SortField::Name => a.name.cmp(&b.name),
            SortField::NameFolded => a.name_folded.cmp(&b.name_folded),
            SortField::FileType => a.file_type.cmp(&b.file_type),
            // Ascending puts directories first.
            SortField::Directories => b.is_dir.cmp(&a.is_dir),
            SortField::CreationTime => a.creation.cmp(&b.creation),
            SortField::ModificationTime => a.modification.cmp(&b.modification),
            SortField::Blocks => a.blocks.cmp(&b.blocks),
            SortField::Eof => a.eof.cmp(&b.eof),
            SortField::Unsorted => unreachable!(),
        };
        if key.descending {
            records.sort_by(|a, b| compare(b, a));
        } else {
            records.sort_by(compare);
        }
    }
}

/// Blocks a directory needs for `entries` live entries.
fn blocks_needed(entries: usize) -> usize {
    if entries <= ENTRIES_PER_BLOCK - 1 {
        1
    } else {
        1 + (entries - (ENTRIES_PER_BLOCK - 1)).div_ceil(ENTRIES_PER_BLOCK)
    }
}

/// Rebuilds the directory from the sorted record list and writes it back,
/// compacting deletion holes and releasing trailing emptied blocks.
///
/// Destination blocks are staged first, then emitted in the chain order of
/// the original directory. Child back-pointer updates go out as each
/// subdirectory entry is placed, before any directory block is written.
pub fn write_sorted(
    sess: &mut Session<'_>,
    image: &mut DirectoryImage,
    records: &[SortRecord],
) -> Result<(), EngineError> {
    let old_len = image.blocks.len();
    debug_assert!(records.len() <= image.capacity());
    let mut staged: Vec<BlockBuf> = Vec::with_capacity(old_len);
    for (index, block) in image.blocks.iter().enumerate() {
        let mut out = [0u8; BLOCK_SIZE];
        // Chain links survive the rewrite; slot data is rebuilt from the
        // sorted list.
        out[..4].copy_from_slice(&block.data[..4]);
        if index == 0 {
            out[slot_offset(1)..slot_offset(2)]
                .copy_from_slice(&block.data[slot_offset(1)..slot_offset(2)]);
        }
        staged.push(out);
    }

    let destinations = (0..old_len).flat_map(|block_index| {
        (DirectoryImage::first_slot(block_index)..=ENTRIES_PER_BLOCK)
            .map(move |slot| (block_index, slot))
    });
    for (record, (dst_block, dst_slot)) in records.iter().zip(destinations) {
        let src = &image.blocks[record.block_index].data;
        let raw_entry: RawDirectoryEntry = *entry(src, record.slot);
        staged[dst_block][slot_offset(dst_slot)..slot_offset(dst_slot + 1)]
            .copy_from_slice(bytemuck::bytes_of(&raw_entry));

        if raw_entry.storage_type() == Some(StorageType::Subdirectory) {
            relink_child(
                sess,
                raw_entry.key_block() as u32,
                image.blocks[dst_block].number,
                dst_slot,
            )?;
        }
    }

    // Release trailing blocks the compacted layout no longer needs. A
    // suppressed directory keeps its chain on disk, so its blocks must not
    // be handed to the free list either.
    let mut keep = blocks_needed(records.len());
    if image.is_volume {
        keep = keep.max(4);
    }
    let keep = if sess.dev.writes_suppressed() {
        old_len
    } else {
        keep.min(old_len)
    };
    if keep < old_len {
        set_next_link(&mut staged[keep - 1], 0);
        for dropped in &image.blocks[keep..] {
            log::debug!("releasing emptied dir blk {}", dropped.number);
            sess.free.set(dropped.number);
            sess.reachable.clear(dropped.number);
        }
    }

    staged.truncate(keep);
    image.blocks.truncate(keep);
    for (block, out) in image.blocks.iter_mut().zip(staged) {
        sess.dev.write(block.number, &out)?;
        block.data = out;
    }
    Ok(())
}

/// Points a moved subdirectory's header back at its new parent slot and
/// flushes it straight away.
fn relink_child(
    sess: &mut Session<'_>,
    child_key: u32,
    parent_block: u32,
    parent_slot: usize,
) -> Result<(), EngineError> {
    let mut buf = [0u8; BLOCK_SIZE];
    sess.dev.read(child_key, &mut buf)?;
    let hdr = crate::structures::directory::header_mut(&mut buf);
    hdr.set_parent(parent_block as u16, parent_slot as u8);
    sess.dev.write(child_key, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::SortKey;

    fn record(name: &str, file_type: u8, blocks: u16, order: usize) -> SortRecord {
        SortRecord {
            block_index: 0,
            slot: order + 2,
            name: name.to_string(),
            name_folded: name.to_ascii_uppercase(),
            file_type,
            is_dir: file_type == DIRECTORY_FILE_TYPE,
            creation: (2020, 1, 1, 0, order as u8),
            modification: (2020, 1, 2, 0, order as u8),
            blocks,
            eof: blocks as u32 * 512,
        }
    }

    fn names(records: &[SortRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn single_key_orders_by_name() {
        let mut records = vec![record("C", 4, 1, 0), record("A", 4, 1, 1), record("B", 4, 1, 2)];
        apply_keys(&mut records, &SortKey::parse_list("n").unwrap());
        assert_eq!(names(&records), ["A", "B", "C"]);
        apply_keys(&mut records, &SortKey::parse_list("N").unwrap());
        assert_eq!(names(&records), ["C", "B", "A"]);
    }

    #[test]
    fn later_keys_dominate_earlier_ones() {
        let mut records = vec![
            record("SUB", DIRECTORY_FILE_TYPE, 1, 0),
            record("B", 4, 3, 1),
            record("A", 4, 3, 2),
            record("C", 6, 1, 3),
        ];
        // Name first, then directories to the front: the directory leads and
        // the rest stay name-sorted.
        apply_keys(&mut records, &SortKey::parse_list("nd").unwrap());
        assert_eq!(names(&records), ["SUB", "A", "B", "C"]);
    }

    #[test]
    fn ties_keep_previous_pass_order() {
        let mut records = vec![
            record("B", 4, 7, 0),
            record("A", 4, 7, 1),
            record("D", 4, 2, 2),
            record("C", 4, 7, 3),
        ];
        apply_keys(&mut records, &SortKey::parse_list("nb").unwrap());
        // Blocks ascending; the 7-block tie stays name-sorted.
        assert_eq!(names(&records), ["D", "A", "B", "C"]);
    }

    #[test]
    fn unsorted_key_is_a_no_op() {
        let mut records = vec![record("C", 4, 1, 0), record("A", 4, 1, 1)];
        apply_keys(&mut records, &SortKey::parse_list(".").unwrap());
        assert_eq!(names(&records), ["C", "A"]);
    }

    #[test]
    fn block_requirements() {
        assert_eq!(blocks_needed(0), 1);
        assert_eq!(blocks_needed(12), 1);
        assert_eq!(blocks_needed(13), 2);
        assert_eq!(blocks_needed(12 + 13), 2);
        assert_eq!(blocks_needed(12 + 13 + 1), 3);
    }
}
