//! ProDOS directory repair, sort and compaction.
//!
//! The engine walks a directory tree on a block device, verifying on-disk
//! metadata and block accounting, optionally rewriting entry order,
//! filename case and date encodings, and reconciling the volume free list
//! against the blocks actually reachable from live files.
//!
//! # Example
//! Sort one directory of an image by name, dry-run:
//! ```no_run
//! use sortdir_prodos::{run, Options, SortKey};
//! use sortdir_io::ImageFile;
//!
//! let mut image = ImageFile::open("volume.po", false)?;
//! let opts = Options {
//!     sort_keys: SortKey::parse_list("n")?,
//!     ..Options::default()
//! };
//! let summary = run(&mut image, "/VOL/SOMEDIR", opts, Box::new(|_| false))?;
//! println!("{} errors", summary.errors);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod fs;
pub mod structures;

pub use fs::driver::run;
pub use fs::{
    DateFormat, EngineError, FixMode, FixPrompt, Options, RunSummary, Scope, SortField, SortKey,
    MAX_SORT_KEYS,
};
pub use structures::CaseTransform;
