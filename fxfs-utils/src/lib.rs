//! Small helpers shared by the `mkfs-fxfs` and `fxfsd` binaries.

use std::env::ArgsOs;
use std::fmt;
use std::path::PathBuf;
use std::process::exit;
use std::env;

/// Returns the command's name along with an iterator over the command's arguments.
pub fn args() -> (String, ArgsOs) {
    let mut args = env::args_os();
    let bin = args
        .next()
        .map(PathBuf::from)
        .and_then(|p| {
            p.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| error("fxfs", "missing binary name"));
    (bin, args)
}

/// Writes an error to stderr, then exits with status 1.
pub fn error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}

/// Divides `a` by `b`, rounding up.
pub fn ceil_division(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Computes `floor(log2(n))`.
///
/// Returns `None` if `n` is zero.
pub fn log2(n: u64) -> Option<u32> {
    if n == 0 {
        None
    } else {
        Some(63 - n.leading_zeros())
    }
}
