use std::io::Write as _;
use std::path::PathBuf;

use clap::Parser;
use sortdir_io::ImageFile;
use sortdir_prodos::{
    CaseTransform, DateFormat, FixMode, Options, Scope, SortKey, run,
};

/// Verify, sort and compact ProDOS directories on a volume image.
#[derive(Debug, Parser)]
#[command(name = "sortdir", version)]
struct Args {
    /// Sort keys, up to 4, applied left to right. Lowercase ascending,
    /// uppercase descending: n/i name, t type, d directories first,
    /// c/m creation/modification time, b blocks, e EOF, . compact only
    #[arg(short = 's', long = "sort", value_name = "KEYS")]
    sort: Option<String>,

    /// Filename case conversion: l lower, u upper, i initial, c camel
    #[arg(short = 'n', long = "name-case", value_name = "CASE")]
    name_case: Option<char>,

    /// Date format conversion: n new (ProDOS 2.5+), o old (legacy)
    #[arg(short = 'd', long = "date-format", value_name = "FMT")]
    date_format: Option<char>,

    /// Fix mode: - ask for each fix, y always fix, n never fix
    #[arg(
        short = 'f',
        long = "fix",
        value_name = "MODE",
        allow_hyphen_values = true
    )]
    fix: Option<char>,

    /// Recurse into the subtree
    #[arg(short = 'r', long)]
    recurse: bool,

    /// Process the whole disk from block 2 (implies -r)
    #[arg(short = 'D', long = "whole-disk")]
    whole_disk: bool,

    /// Enable writing to the image
    #[arg(short = 'w', long)]
    write: bool,

    /// Zero free blocks after reconciliation (implies -D)
    #[arg(short = 'z', long = "zero-free")]
    zero_free: bool,

    /// Verbose debug output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// ProDOS volume image (raw block order)
    image: PathBuf,

    /// Starting directory inside the volume
    #[arg(default_value = "/")]
    dir: String,
}

// Exit codes: 0 success, 1 bad arguments, 2 allocation failure (reserved;
// allocation failure aborts in Rust), 3 fatal i/o or structural error.
fn main() {
    std::process::exit(cli());
}

fn cli() -> i32 {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return 1;
        }
    };

    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init()
        .unwrap();

    let opts = match build_options(&args) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("** {message}");
            return 1;
        }
    };

    let mut image = match ImageFile::open(&args.image, args.write) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("** cannot open {}: {err}", args.image.display());
            return 3;
        }
    };

    match run(&mut image, &args.dir, opts, Box::new(ask_user)) {
        Ok(_summary) => 0,
        Err(err) => {
            eprintln!("** {err}");
            err.exit_code()
        }
    }
}

fn build_options(args: &Args) -> Result<Options, String> {
    let sort_keys = match &args.sort {
        Some(keys) => SortKey::parse_list(keys).map_err(|err| err.to_string())?,
        None => Vec::new(),
    };
    let case_transform = args
        .name_case
        .map(|c| CaseTransform::from_char(c).ok_or(format!("invalid case option '{c}'")))
        .transpose()?;
    let date_format = args
        .date_format
        .map(|c| DateFormat::from_char(c).ok_or(format!("invalid date option '{c}'")))
        .transpose()?;
    let fix_mode = args
        .fix
        .map(|c| FixMode::from_char(c).ok_or(format!("invalid fix option '{c}'")))
        .transpose()?
        .unwrap_or_default();

    let scope = if args.whole_disk || args.zero_free {
        Scope::Volume
    } else if args.recurse {
        Scope::Subtree
    } else {
        Scope::Directory
    };

    Ok(Options {
        sort_keys,
        case_transform,
        date_format,
        fix_mode,
        scope,
        write_enabled: args.write,
        zero_free: args.zero_free,
    })
}

fn ask_user(what: &str) -> bool {
    print!("Fix {what} (y/n)? ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(_) => line.trim().eq_ignore_ascii_case("y"),
        Err(_) => false,
    }
}
