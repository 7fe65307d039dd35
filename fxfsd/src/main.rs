//! The handle-protocol server entry point (spec §4.6, §7).
//!
//! Accepts one client connection at a time over a Unix domain socket and
//! serves it to completion before accepting the next, matching the
//! single-threaded cooperative model: there is no connection pool and no
//! worker threads here.

use std::fs::OpenOptions;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use fxfs::block::FileBlockDevice;
use fxfs::fs::Filesystem;
use fxfs::Server;

struct Args {
    device_path: Option<PathBuf>,
    socket_path: Option<PathBuf>,
    format_if_missing: bool,
    help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            device_path: None,
            socket_path: None,
            format_if_missing: false,
            help: false,
        }
    }
}

fn parse_args(bin: &str, mut iter: std::env::ArgsOs) -> Args {
    let mut args = Args::default();
    while let Some(arg) = iter.next() {
        let arg = arg.to_string_lossy().into_owned();
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            "--format-if-missing" => args.format_if_missing = true,
            _ if args.device_path.is_none() => args.device_path = Some(PathBuf::from(arg)),
            _ if args.socket_path.is_none() => args.socket_path = Some(PathBuf::from(arg)),
            other => fxfs_utils::error(bin, format!("unrecognized argument `{other}`")),
        }
    }
    args
}

fn open_filesystem(
    bin: &str,
    device_path: &PathBuf,
    format_if_missing: bool,
) -> Filesystem<FileBlockDevice> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device_path)
        .unwrap_or_else(|e| fxfs_utils::error(bin, format!("{}: {e}", device_path.display())));
    let device = FileBlockDevice::open(device_path, file)
        .unwrap_or_else(|e| fxfs_utils::error(bin, format!("{}: {e}", device_path.display())));

    match Filesystem::mount(device) {
        Ok(fs) => fs,
        Err(e) if format_if_missing => {
            log::warn!("{}: no usable filesystem ({e}), formatting", device_path.display());
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(device_path)
                .unwrap_or_else(|e| fxfs_utils::error(bin, format!("{}: {e}", device_path.display())));
            let device = FileBlockDevice::open(device_path, file)
                .unwrap_or_else(|e| fxfs_utils::error(bin, format!("{}: {e}", device_path.display())));
            let total_blocks = device.block_count();
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Filesystem::format_new(device, total_blocks, now)
                .unwrap_or_else(|e| fxfs_utils::error(bin, format!("format failed: {e}")))
        }
        Err(e) => fxfs_utils::error(
            bin,
            format!("{}: {e} (pass --format-if-missing to format it)", device_path.display()),
        ),
    }
}

fn main() {
    env_logger::init();
    let (bin, argv) = fxfs_utils::args();
    let args = parse_args(&bin, argv);

    if args.help {
        println!("usage: {bin} [--format-if-missing] <device> <socket>");
        return;
    }

    let device_path = args
        .device_path
        .unwrap_or_else(|| fxfs_utils::error(&bin, "specify a path to a device or file"));
    let socket_path = args
        .socket_path
        .unwrap_or_else(|| fxfs_utils::error(&bin, "specify a path for the listening socket"));

    let fs = open_filesystem(&bin, &device_path, args.format_if_missing);

    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }
    let listener = UnixListener::bind(&socket_path)
        .unwrap_or_else(|e| fxfs_utils::error(&bin, format!("{}: {e}", socket_path.display())));
    log::info!("fxfsd listening on {}", socket_path.display());

    let mut server = Server::new(fs);
    for conn in listener.incoming() {
        let mut conn: UnixStream = match conn {
            Ok(c) => c,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        if let Err(e) = server.serve_connection(&mut conn) {
            log::warn!("connection ended with an error: {e}");
        }
    }
}
