//! The repair/sort engine.
//!
//! Components run synchronously on one thread and share state through
//! [`Session`], which owns the device handle, the two volume bitmaps and
//! the error counter for the run.

pub mod dir;
pub mod driver;
pub mod reconcile;
pub mod sort;
pub mod walker;

use core::fmt;

use crate::structures::directory::{self, StorageType};
use crate::structures::name::CaseTransform;
use crate::structures::raw::{ENTRIES_PER_BLOCK, ENTRY_SIZE, VOLUME_KEY_BLOCK};
use crate::structures::BlockBitmap;
use sortdir_io::{BlockBuf, BlockDevice, DeviceError, BLOCK_SIZE};

/// Upper bound on nested sort keys.
pub const MAX_SORT_KEYS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The device failed; the run stops after reporting the block.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Block 2 does not carry a sound volume directory header. Such volumes
    /// are refused outright.
    #[error("block {block} does not hold a valid volume directory header")]
    BadVolumeHeader { block: u32 },

    #[error("no such directory: {0}")]
    NoSuchDirectory(String),

    #[error("invalid sort key '{0}'")]
    InvalidSortKey(char),

    #[error("at most {MAX_SORT_KEYS} sort keys are supported")]
    TooManySortKeys,
}

impl EngineError {
    /// Exit code for this failure: 1 for bad arguments, 3 for fatal i/o or
    /// structural errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Device(_) | Self::BadVolumeHeader { .. } => 3,
            Self::NoSuchDirectory(_) | Self::InvalidSortKey(_) | Self::TooManySortKeys => 1,
        }
    }
}

/// Field a sort pass orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    NameFolded,
    FileType,
    Directories,
    CreationTime,
    ModificationTime,
    Blocks,
    Eof,
    /// The `.` pseudo-key: keeps the current order, still compacts.
    Unsorted,
}

/// One sort level; lowercase key letters ascend, uppercase descend.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

impl SortKey {
    pub fn from_char(c: char) -> Result<Self, EngineError> {
        let field = match c.to_ascii_lowercase() {
            'n' => SortField::Name,
            'i' => SortField::NameFolded,
            't' => SortField::FileType,
            'd' => SortField::Directories,
            'c' => SortField::CreationTime,
            'm' => SortField::ModificationTime,
            'b' => SortField::Blocks,
            'e' => SortField::Eof,
            '.' => SortField::Unsorted,
            _ => return Err(EngineError::InvalidSortKey(c)),
        };
        Ok(Self {
            field,
            descending: c.is_ascii_uppercase(),
        })
    }

    /// Parses a key list such as `nd` or `Tn`, left to right.
    pub fn parse_list(keys: &str) -> Result<Vec<Self>, EngineError> {
        if keys.chars().count() > MAX_SORT_KEYS {
            return Err(EngineError::TooManySortKeys);
        }
        keys.chars().map(Self::from_char).collect()
    }
}

/// Target on-disk date encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// ProDOS 1.0-2.4.2 layout
    Legacy,
    /// ProDOS 2.5+ layout
    ProDos25,
}

impl DateFormat {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'o' => Some(Self::Legacy),
            'n' => Some(Self::ProDos25),
            _ => None,
        }
    }

    pub fn is_pd25(self) -> bool {
        matches!(self, Self::ProDos25)
    }
}

/// Whether detected inconsistencies are repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixMode {
    #[default]
    Never,
    Ask,
    Always,
}

impl FixMode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'n' => Some(Self::Never),
            '-' | '?' => Some(Self::Ask),
            'y' => Some(Self::Always),
            _ => None,
        }
    }
}

/// How much of the volume one run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Directory,
    Subtree,
    /// Everything reachable from block 2; enables free-list reconciliation.
    Volume,
}

impl Scope {
    pub fn recurses(self) -> bool {
        !matches!(self, Self::Directory)
    }
}

/// Configuration for one run.
#[derive(Default)]
pub struct Options {
    pub sort_keys: Vec<SortKey>,
    pub case_transform: Option<CaseTransform>,
    pub date_format: Option<DateFormat>,
    pub fix_mode: FixMode,
    pub scope: Scope,
    pub write_enabled: bool,
    pub zero_free: bool,
}

impl Options {
    /// Applies the option implications: zeroing needs the whole volume, and
    /// a case rewrite, date rewrite or active fix mode without sort keys
    /// still needs the write path, so it gets the order-preserving
    /// pseudo-key.
    pub fn normalize(&mut self) {
        if self.zero_free {
            self.scope = Scope::Volume;
        }
        if self.sort_keys.is_empty()
            && (self.case_transform.is_some()
                || self.date_format.is_some()
                || self.fix_mode != FixMode::Never)
        {
            self.sort_keys.push(SortKey {
                field: SortField::Unsorted,
                descending: false,
            });
        }
    }
}

/// Callback consulted for each repair when the fix mode is `Ask`.
pub type FixPrompt<'a> = Box<dyn FnMut(&str) -> bool + 'a>;

/// Device access with the library-directory write guard.
///
/// Writes are silently swallowed (and reported as skipped) while the
/// current directory is named exactly `LIB` or `LIBRARIES`; a deliberate
/// safety valve for shared library folders.
pub(crate) struct DeviceIo<'a> {
    dev: &'a mut dyn BlockDevice,
    current_dir: String,
}

impl<'a> DeviceIo<'a> {
    fn new(dev: &'a mut dyn BlockDevice) -> Self {
        Self {
            dev,
            current_dir: String::new(),
        }
    }

    pub(crate) fn set_directory_name(&mut self, name: &str) {
        self.current_dir = name.to_string();
    }

    /// The library-directory guard is active.
    pub(crate) fn writes_suppressed(&self) -> bool {
        self.current_dir == "LIB" || self.current_dir == "LIBRARIES"
    }

    pub(crate) fn read(&mut self, block: u32, buf: &mut BlockBuf) -> Result<(), EngineError> {
        self.dev.read_block(block, buf).map_err(EngineError::from)
    }

    pub(crate) fn write(&mut self, block: u32, buf: &BlockBuf) -> Result<(), EngineError> {
        if self.writes_suppressed() {
            println!("Not writing library directory {}", self.current_dir);
            return Ok(());
        }
        self.dev.write_block(block, buf).map_err(EngineError::from)
    }
}

/// State for one traversal: device, options, bitmaps, error counter and the
/// fix prompt. Dropped when the run finishes; nothing persists between runs.
pub struct Session<'a> {
    pub(crate) dev: DeviceIo<'a>,
    pub(crate) opts: Options,
    pub(crate) total_blocks: u32,
    pub(crate) bitmap_block: u32,
    pub(crate) volume_name: String,
    pub(crate) free: BlockBitmap,
    pub(crate) reachable: BlockBitmap,
    errors: u32,
    prompt: FixPrompt<'a>,
}

impl<'a> Session<'a> {
    /// Reads the volume header and free list. Fails with
    /// [`EngineError::BadVolumeHeader`] when block 2 is not a volume
    /// directory key block.
    pub fn new(
        dev: &'a mut dyn BlockDevice,
        mut opts: Options,
        prompt: FixPrompt<'a>,
    ) -> Result<Self, EngineError> {
        opts.normalize();
        let mut dev = DeviceIo::new(dev);
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read(VOLUME_KEY_BLOCK, &mut buf)?;

        let hdr = directory::header(&buf);
        if hdr.storage_type() != Some(StorageType::VolumeHeader)
            || hdr.entry_size as usize != ENTRY_SIZE
            || hdr.entries_per_block as usize != ENTRIES_PER_BLOCK
        {
            return Err(EngineError::BadVolumeHeader {
                block: VOLUME_KEY_BLOCK,
            });
        }
        let total_blocks = hdr.total_blocks() as u32;
        let bitmap_block = hdr.bitmap_block() as u32;
        if total_blocks <= VOLUME_KEY_BLOCK || bitmap_block <= VOLUME_KEY_BLOCK {
            return Err(EngineError::BadVolumeHeader {
                block: VOLUME_KEY_BLOCK,
            });
        }
        let volume_name = hdr.decoded_name();
        log::debug!("volume {volume_name}: {total_blocks} blocks, bitmap at {bitmap_block}");

        let mut sess = Self {
            dev,
            opts,
            total_blocks,
            bitmap_block,
            volume_name,
            free: BlockBitmap::new(total_blocks),
            reachable: BlockBitmap::new(total_blocks),
            errors: 0,
            prompt,
        };
        sess.load_free_list()?;
        Ok(sess)
    }

    /// Loads the on-disk free list and accounts for the blocks no directory
    /// entry points at: the two boot blocks and the free list itself.
    fn load_free_list(&mut self) -> Result<(), EngineError> {
        self.reachable.set(0);
        self.reachable.set(1);
        let mut buf = [0u8; BLOCK_SIZE];
        for index in 0..self.free_list_blocks() {
            let block = self.bitmap_block + index;
            self.reachable.set(block);
            self.dev.read(block, &mut buf)?;
            self.free.load_block(index as usize, &buf);
        }
        Ok(())
    }

    /// Blocks occupied by the free list: one per 4096 volume blocks.
    pub(crate) fn free_list_blocks(&self) -> u32 {
        self.total_blocks.div_ceil(8 * BLOCK_SIZE as u32)
    }

    /// Counts and prints a warning or recoverable error. Non-fatal lines
    /// carry a two-space prefix; fatal failures travel as [`EngineError`]
    /// instead.
    pub(crate) fn report(&mut self, args: fmt::Arguments<'_>) {
        self.errors += 1;
        println!("  {args}");
    }

    /// Whether to repair the inconsistency just reported.
    pub(crate) fn ask_fix(&mut self, what: &str) -> bool {
        match self.opts.fix_mode {
            FixMode::Never => false,
            FixMode::Always => true,
            FixMode::Ask => (self.prompt)(what),
        }
    }

    /// Marks a block reachable, complaining when it is on the free list or
    /// was already reached through another file.
    pub(crate) fn check_block(&mut self, block: u32, label: &str) {
        let total = self.total_blocks;
        if block >= total {
            self.report(format_args!(
                "{label} blk {block} is out of range ({total} blocks)"
            ));
            return;
        }
        if self.free.is_set(block) {
            self.report(format_args!("{label} blk {block} is marked free!"));
        }
        if self.reachable.is_set(block) {
            self.report(format_args!("{label} blk {block} is already used!"));
        }
        self.reachable.set(block);
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }
}

/// Separator line in the run report.
pub(crate) fn rule(c: char) {
    println!("{}", c.to_string().repeat(80));
}

/// Totals reported after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub directories: u32,
    pub errors: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_parsing() {
        let keys = SortKey::parse_list("nD").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(matches!(keys[0].field, SortField::Name));
        assert!(!keys[0].descending);
        assert!(matches!(keys[1].field, SortField::Directories));
        assert!(keys[1].descending);

        assert!(matches!(
            SortKey::parse_list("x"),
            Err(EngineError::InvalidSortKey('x'))
        ));
        assert!(matches!(
            SortKey::parse_list("nnnnn"),
            Err(EngineError::TooManySortKeys)
        ));
    }

    #[test]
    fn normalize_implies_compaction_key() {
        let mut opts = Options {
            case_transform: Some(CaseTransform::Lower),
            ..Options::default()
        };
        opts.normalize();
        assert_eq!(opts.sort_keys.len(), 1);
        assert!(matches!(opts.sort_keys[0].field, SortField::Unsorted));
    }

    #[test]
    fn normalize_zero_free_implies_volume_scope() {
        let mut opts = Options {
            zero_free: true,
            ..Options::default()
        };
        opts.normalize();
        assert_eq!(opts.scope, Scope::Volume);
        assert!(opts.scope.recurses());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(EngineError::InvalidSortKey('q').exit_code(), 1);
        assert_eq!(EngineError::BadVolumeHeader { block: 2 }.exit_code(), 3);
    }
}
