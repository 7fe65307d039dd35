//! Wire framing and request/response tags (spec §4.6, §6.2, §6.3).
//!
//! Every message, request or response, has the shape
//! `tag (u32 LE) | data_len (u32 LE) | data (<= 4096 bytes)`. Framing is
//! written against `Read`/`Write` directly so tests can drive it with an
//! in-memory buffer instead of a real socket.

use std::io::{self, Read, Write};

use crate::block::BLOCK_SIZE;

pub const T_OPEN: u32 = 1;
pub const T_CREATE: u32 = 2;
pub const T_READ: u32 = 3;
pub const T_WRITE: u32 = 4;
pub const T_CLOSE: u32 = 5;
pub const T_STAT: u32 = 6;
pub const T_REMOVE: u32 = 7;

pub const R_OK: u32 = 0x8000_0000;
pub const R_ERROR: u32 = 0x8000_0001;

/// `T_CREATE`'s flags bit meaning "create a directory".
pub const CREATE_DIR: u32 = 1 << 0;

/// Size of a `T_STAT` response.
pub const STAT_RESPONSE_SIZE: usize = 64;
/// Size of one directory-entry record returned from a directory read.
pub const DIR_RECORD_SIZE: usize = 72;
/// Max length of a directory-entry record's name field.
pub const DIR_RECORD_NAME_LEN: usize = 64;

/// A single framed message: a tag plus its data payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub tag: u32,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(tag: u32, data: Vec<u8>) -> Self {
        Self { tag, data }
    }

    pub fn ok(data: Vec<u8>) -> Self {
        Self::new(R_OK, data)
    }

    pub fn error() -> Self {
        Self::new(R_ERROR, Vec::new())
    }
}

/// Reads one framed message from `r`.
///
/// Returns an I/O error (including unexpected EOF) on a short read, or if
/// `data_len` exceeds [`BLOCK_SIZE`] — such a message could never have been
/// legally written by this protocol.
pub fn read_message<R: Read>(r: &mut R) -> io::Result<Message> {
    let mut header = [0u8; 8];
    r.read_exact(&mut header)?;
    let tag = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let data_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    if data_len > BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame data_len exceeds block size",
        ));
    }
    let mut data = vec![0u8; data_len];
    r.read_exact(&mut data)?;
    Ok(Message { tag, data })
}

/// Writes one framed message to `w`.
pub fn write_message<W: Write>(w: &mut W, msg: &Message) -> io::Result<()> {
    debug_assert!(msg.data.len() <= BLOCK_SIZE);
    w.write_all(&msg.tag.to_le_bytes())?;
    w.write_all(&(msg.data.len() as u32).to_le_bytes())?;
    w.write_all(&msg.data)?;
    Ok(())
}

/// Packs a `T_STAT` response.
pub fn pack_stat(size: u32, file_type: u32) -> [u8; STAT_RESPONSE_SIZE] {
    let mut b = [0u8; STAT_RESPONSE_SIZE];
    b[0..4].copy_from_slice(&size.to_le_bytes());
    b[4..8].copy_from_slice(&file_type.to_le_bytes());
    b
}

/// Packs one fixed 72-byte directory-entry record; `name` is truncated to
/// [`DIR_RECORD_NAME_LEN`] bytes if longer.
pub fn pack_dir_record(name: &str, file_type: u32, size: u32) -> [u8; DIR_RECORD_SIZE] {
    let mut b = [0u8; DIR_RECORD_SIZE];
    let name_bytes = name.as_bytes();
    let n = name_bytes.len().min(DIR_RECORD_NAME_LEN);
    b[0..n].copy_from_slice(&name_bytes[0..n]);
    b[64..68].copy_from_slice(&file_type.to_le_bytes());
    b[68..72].copy_from_slice(&size.to_le_bytes());
    b
}
