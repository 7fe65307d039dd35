//! The internal error taxonomy.
//!
//! None of these variants ever reach a protocol client directly: the handle
//! server (see [`crate::server`]) collapses every `Err` into a bare
//! `R_ERROR` response, logging the real cause through the `log` facade first.

use std::io;

/// An error produced anywhere in the filesystem engine.
#[derive(Debug, thiserror::Error)]
pub enum FxfsError {
    /// The underlying block device returned a short read/write, or a block
    /// number fell outside the device.
    #[error("device error: {0}")]
    Device(#[from] io::Error),

    /// The free-space bitmap has no block left to allocate.
    #[error("bitmap exhausted: no free block")]
    BitmapFull,

    /// All 32 handle slots are in use.
    #[error("handle table exhausted")]
    HandleTableFull,

    /// An insert would overflow a 4096-byte leaf; splitting is not
    /// implemented (see spec §9).
    #[error("leaf full: node splitting is not supported")]
    LeafFull,

    /// The superblock's magic did not match `FXFS0001`.
    #[error("bad superblock magic")]
    BadMagic,

    /// The superblock's checksum did not match its contents.
    #[error("superblock checksum mismatch")]
    ChecksumMismatch,

    /// A stored block number is outside `[0, total_blocks)`.
    #[error("impossible block number {0}")]
    ImpossibleBlock(u64),

    /// A path component could not be resolved.
    #[error("not found")]
    NotFound,

    /// A path component that should be a directory is not one.
    #[error("not a directory")]
    NotADirectory,

    /// An insert was attempted over an existing key.
    #[error("key already exists")]
    AlreadyExists,

    /// The request was malformed for its tag (too short, or too long).
    #[error("malformed request")]
    MalformedRequest,

    /// The request's tag was not recognized.
    #[error("unknown request tag {0}")]
    UnknownTag(u32),

    /// The request referenced a handle that is out of range or inactive.
    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    /// An extent write would not land in contiguous blocks.
    #[error("extent would not be contiguous")]
    NonContiguousExtent,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FxfsError>;
