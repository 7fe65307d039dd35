//! Offline formatter: writes the initial superblock, bitmap, and root leaf
//! to a device or file, producing the same layout the server would build
//! via its own `--format-if-missing` path.

use std::fs::OpenOptions;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use fxfs::block::{FileBlockDevice, BLOCK_SIZE};
use fxfs::fs::Filesystem;
use fxfs::superblock::Superblock;

#[derive(Default)]
struct Args {
    device_path: Option<PathBuf>,
    blocks: Option<u64>,
    yes: bool,
    help: bool,
}

fn parse_args(bin: &str, mut iter: std::env::ArgsOs) -> Args {
    let mut args = Args::default();
    while let Some(arg) = iter.next() {
        let arg = arg.to_string_lossy().into_owned();
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            "-y" | "--yes" => args.yes = true,
            "--blocks" => {
                let n = iter
                    .next()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| fxfs_utils::error(bin, "--blocks requires a value"));
                args.blocks = Some(
                    n.parse()
                        .unwrap_or_else(|_| fxfs_utils::error(bin, format!("invalid block count `{n}`"))),
                );
            }
            _ if args.device_path.is_none() => args.device_path = Some(PathBuf::from(arg)),
            other => fxfs_utils::error(bin, format!("unrecognized argument `{other}`")),
        }
    }
    args
}

fn confirm(prompt: &str) -> bool {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    line.trim().eq_ignore_ascii_case("y")
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn main() {
    env_logger::init();
    let (bin, argv) = fxfs_utils::args();
    let args = parse_args(&bin, argv);

    if args.help {
        println!("usage: {bin} [--blocks N] [-y|--yes] <device>");
        return;
    }

    let device_path = args
        .device_path
        .unwrap_or_else(|| fxfs_utils::error(&bin, "specify a path to a device or file"));

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(args.blocks.is_some())
        .open(&device_path)
        .unwrap_or_else(|e| fxfs_utils::error(&bin, format!("{}: {e}", device_path.display())));

    if let Some(blocks) = args.blocks {
        file.set_len(blocks * BLOCK_SIZE as u64)
            .unwrap_or_else(|e| fxfs_utils::error(&bin, format!("{}: {e}", device_path.display())));
    }

    let mut device = FileBlockDevice::open(&device_path, file)
        .unwrap_or_else(|e| fxfs_utils::error(&bin, format!("{}: {e}", device_path.display())));
    let total_blocks = args.blocks.unwrap_or_else(|| device.block_count());

    if let Ok(existing) = Superblock::mount(&mut device) {
        log::info!("existing fxfs filesystem found, generation {}", existing.generation);
        if !args.yes && !confirm(&format!(
            "{} already contains an fxfs filesystem (generation {}). Overwrite? (y/N) ",
            device_path.display(),
            existing.generation
        )) {
            eprintln!("{bin}: aborted");
            std::process::exit(1);
        }
    }

    let mut fs = Filesystem::format_new(device, total_blocks, now_unix())
        .unwrap_or_else(|e| fxfs_utils::error(&bin, format!("format failed: {e}")));
    let free = fs
        .free_blocks()
        .unwrap_or_else(|e| fxfs_utils::error(&bin, format!("format failed: {e}")));

    println!(
        "{}: formatted {} blocks ({} bytes), {} free",
        bin,
        total_blocks,
        total_blocks * BLOCK_SIZE as u64,
        free,
    );
}
