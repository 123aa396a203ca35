//! Free-list reconciliation against the reachable set.
//!
//! After a whole-volume walk every block must be exactly one of reachable
//! or free. Disagreements are reported and optionally repaired; the free
//! list goes back to disk only when something actually changed it.

use std::io::Write as _;

use crate::fs::{EngineError, Session};
use sortdir_io::BLOCK_SIZE;

/// Diffs the free list against the reachable list, offering fixes for each
/// mismatch, then zeroes free blocks when requested.
pub fn reconcile(sess: &mut Session<'_>) -> Result<(), EngineError> {
    let total = sess.total_blocks;
    println!("Total blks\t{total}");
    println!("Free blks\t{}", sess.free.count_set(total));

    for byte_index in 0..(total as usize).div_ceil(8) {
        let free_byte = sess.free.byte(byte_index);
        let reachable_byte = sess.reachable.byte(byte_index);
        let whole_byte_in_range = (byte_index + 1) * 8 <= total as usize;
        if whole_byte_in_range && free_byte ^ reachable_byte == 0xff {
            continue;
        }
        for bit in 0..8u32 {
            let block = byte_index as u32 * 8 + bit;
            if block >= total {
                break;
            }
            let free = sess.free.is_set(block);
            let reachable = sess.reachable.is_set(block);
            if free && reachable {
                sess.report(format_args!("Blk {block} used, marked free"));
                if sess.ask_fix("clear free bit") {
                    sess.free.clear(block);
                }
            } else if !free && !reachable {
                sess.report(format_args!("Blk {block} unused, not marked free"));
                if sess.ask_fix("set free bit") {
                    sess.free.set(block);
                }
            }
        }
    }

    if sess.opts.zero_free {
        zero_free_blocks(sess)?;
    }
    Ok(())
}

/// Writes the free list back to its on-disk location if it was modified
/// during the run and writes are enabled.
pub fn flush_free_list(sess: &mut Session<'_>) -> Result<(), EngineError> {
    if !sess.free.changed() || !sess.opts.write_enabled {
        return Ok(());
    }
    log::debug!("writing free list at blk {}", sess.bitmap_block);
    let mut buf = [0u8; BLOCK_SIZE];
    for index in 0..sess.free_list_blocks() {
        let start = index as usize * BLOCK_SIZE;
        buf.copy_from_slice(&sess.free.as_bytes()[start..start + BLOCK_SIZE]);
        let block = sess.bitmap_block + index;
        sess.dev.write(block, &buf)?;
    }
    Ok(())
}

/// Overwrites every finally-free block with zeros.
fn zero_free_blocks(sess: &mut Session<'_>) -> Result<(), EngineError> {
    if !sess.opts.write_enabled {
        println!("** NOT zeroing free blocks");
        return Ok(());
    }
    println!("Zeroing free blocks ...");
    let free_blocks = sess.free.count_set(sess.total_blocks);
    let step = free_blocks / 60;
    let zero = [0u8; BLOCK_SIZE];
    let mut since_tick = 0;
    for block in 0..sess.total_blocks {
        if !sess.free.is_set(block) {
            continue;
        }
        sess.dev.write(block, &zero)?;
        since_tick += 1;
        if step > 0 && since_tick == step {
            print!("=");
            let _ = std::io::stdout().flush();
            since_tick = 0;
        }
    }
    println!("\nDone zeroing!");
    Ok(())
}
