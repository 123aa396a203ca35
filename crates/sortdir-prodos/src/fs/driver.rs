//! Run orchestration: the subdirectory work queue and the per-directory
//! read / sort / write phases.

use std::collections::VecDeque;

use crate::fs::{
    dir, reconcile, rule, sort, EngineError, FixMode, FixPrompt, Options, RunSummary, Scope,
    Session,
};
use crate::structures::directory::{entry, next_link, StorageType};
use crate::structures::raw::{ENTRIES_PER_BLOCK, VOLUME_KEY_BLOCK};
use sortdir_io::{BLOCK_SIZE, BlockDevice};

/// Runs one traversal over `start_dir` (a `/VOLUME/SUB/DIR` style path;
/// ignored in whole-volume scope). Returns the totals, or the fatal error
/// that stopped the run.
pub fn run(
    dev: &mut dyn BlockDevice,
    start_dir: &str,
    opts: Options,
    prompt: FixPrompt<'_>,
) -> Result<RunSummary, EngineError> {
    let mut sess = Session::new(dev, opts, prompt)?;

    let start_block = match sess.opts.scope {
        Scope::Volume => VOLUME_KEY_BLOCK,
        _ => resolve_path(&mut sess, start_dir)?,
    };

    let mut queue: VecDeque<u32> = VecDeque::new();
    queue.push_back(start_block);
    let mut directories = 0u32;

    while let Some(key_block) = queue.pop_front() {
        let subdirs = process_directory(&mut sess, key_block)?;
        directories += 1;
        if sess.opts.scope.recurses() {
            // The first child goes to the head of the queue, its siblings
            // in order behind it; children of later directories queue after
            // their uncles.
            for (offset, subdir) in subdirs.into_iter().enumerate() {
                queue.insert(offset, subdir);
            }
        }
    }

    sess.dev.set_directory_name("");
    if sess.opts.scope == Scope::Volume {
        reconcile::reconcile(&mut sess)?;
    }
    reconcile::flush_free_list(&mut sess)?;

    let errors = sess.errors();
    rule('-');
    if errors == 0 {
        println!("DONE - no errors found.");
    } else {
        println!("DONE - {errors} errors");
    }
    rule('-');
    Ok(RunSummary {
        directories,
        errors,
    })
}

/// Read, then sort/write when configured. Returns the child key blocks for
/// the queue.
fn process_directory(
    sess: &mut Session<'_>,
    key_block: u32,
) -> Result<Vec<u32>, EngineError> {
    let Some(mut image) = dir::read_directory(sess, key_block)? else {
        return Ok(Vec::new());
    };

    if !sess.opts.sort_keys.is_empty() {
        if image.errors > 0 && sess.opts.fix_mode == FixMode::Never {
            sess.report(format_args!("Error scanning directory, will not sort"));
        } else {
            let keys = sess.opts.sort_keys.clone();
            let mut records = sort::build_records(&image);
            sort::apply_keys(&mut records, &keys);
            if sess.opts.write_enabled {
                log::debug!("writing directory {}", image.name);
                sort::write_sorted(sess, &mut image, &records)?;
            } else {
                println!("** NOT writing dir {}", image.name);
            }
        }
    }
    Ok(image.subdirs)
}

/// Walks a slash-separated path down from the volume directory. A leading
/// component naming the volume itself is accepted and skipped.
fn resolve_path(sess: &mut Session<'_>, path: &str) -> Result<u32, EngineError> {
    let mut components: VecDeque<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if let Some(first) = components.front() {
        if first.eq_ignore_ascii_case(&sess.volume_name) {
            components.pop_front();
        }
    }

    let mut block = VOLUME_KEY_BLOCK;
    'component: for component in components {
        let mut current = block;
        let mut first_block = true;
        let mut steps = 0u32;
        let mut buf = [0u8; BLOCK_SIZE];
        loop {
            steps += 1;
            if steps > sess.total_blocks {
                return Err(EngineError::NoSuchDirectory(path.to_string()));
            }
            sess.dev.read(current, &mut buf)?;
            let first_slot = if first_block { 2 } else { 1 };
            for slot in first_slot..=ENTRIES_PER_BLOCK {
                let ent = entry(&buf, slot);
                if ent.is_live()
                    && ent.storage_type() == Some(StorageType::Subdirectory)
                    && ent.decoded_name().eq_ignore_ascii_case(component)
                {
                    block = ent.key_block() as u32;
                    continue 'component;
                }
            }
            let next = next_link(&buf);
            if next == 0 {
                return Err(EngineError::NoSuchDirectory(path.to_string()));
            }
            current = next as u32;
            first_block = false;
        }
    }
    Ok(block)
}
