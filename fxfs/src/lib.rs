//! Copy-on-write B-tree filesystem engine and handle-oriented file-server
//! protocol.
//!
//! The crate is layered bottom-up, each module depending only on the ones
//! above it in this list:
//!
//! - [`block`] — byte-addressed block device.
//! - [`cache`] — fixed-size block cache.
//! - [`bitmap`] — free-space allocator.
//! - [`btree`] — the CoW B-tree (keys, node layout, search/scan/mutate).
//! - [`superblock`] — duplicated, checksummed filesystem header.
//! - [`inode`] — inode, directory-entry and extent item payloads.
//! - [`format`] — initial on-disk layout shared by the formatter and server.
//! - [`fs`] — path resolution, read/write/create/remove over the above.
//! - [`handle`] — the server's opaque handle table.
//! - [`protocol`] — wire framing and request tags.
//! - [`server`] — the request dispatcher.

pub mod bitmap;
pub mod block;
pub mod btree;
pub mod cache;
pub mod error;
pub mod format;
pub mod fs;
pub mod handle;
pub mod inode;
pub mod protocol;
pub mod server;
pub mod superblock;

pub use error::{FxfsError, Result};
pub use fs::Filesystem;
pub use server::Server;
