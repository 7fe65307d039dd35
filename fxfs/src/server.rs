//! The request dispatcher (spec §4.6).
//!
//! `serve_connection` drives the framed request/response loop to completion
//! for one channel; `dispatch` handles exactly one request and never
//! panics — every [`FxfsError`] collapses to a bare `R_ERROR`, with the real
//! cause logged (spec §7: "the server's own stderr stream is the only debug
//! channel").

use std::io::{self, Read, Write};

use crate::block::{BlockDevice, BLOCK_SIZE};
use crate::error::{FxfsError, Result};
use crate::fs::Filesystem;
use crate::handle::{HandleTable, CTL_INODE};
use crate::protocol::{self, pack_stat, Message, CREATE_DIR, T_CLOSE, T_CREATE, T_OPEN, T_READ, T_REMOVE, T_STAT, T_WRITE};

/// Owns the filesystem and the handle table for one running server.
///
/// Deliberately not a singleton: every test constructs its own `Server`
/// over a fresh [`Filesystem`] (spec §9 "Global state").
pub struct Server<D: BlockDevice> {
    fs: Filesystem<D>,
    handles: HandleTable,
}

impl<D: BlockDevice> Server<D> {
    pub fn new(fs: Filesystem<D>) -> Self {
        Self {
            fs,
            handles: HandleTable::new(),
        }
    }

    /// Serves `stream` to completion: one request in, one response out,
    /// until the peer closes the connection.
    pub fn serve_connection<S: Read + Write>(&mut self, stream: &mut S) -> io::Result<()> {
        loop {
            let request = match protocol::read_message(stream) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            };
            let response = self.dispatch(&request);
            protocol::write_message(stream, &response)?;
        }
    }

    /// Handles one request, never failing: any error is logged and turned
    /// into `R_ERROR`.
    pub fn dispatch(&mut self, request: &Message) -> Message {
        match self.handle(request) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("request (tag {}) failed: {e}", request.tag);
                Message::error()
            }
        }
    }

    fn handle(&mut self, request: &Message) -> Result<Message> {
        match request.tag {
            T_OPEN => self.handle_open(&request.data),
            T_CREATE => self.handle_create(&request.data),
            T_READ => self.handle_read(&request.data),
            T_WRITE => self.handle_write(&request.data),
            T_CLOSE => self.handle_close(&request.data),
            T_STAT => self.handle_stat(&request.data),
            T_REMOVE => self.handle_remove(&request.data),
            other => Err(FxfsError::UnknownTag(other)),
        }
    }

    fn handle_open(&mut self, data: &[u8]) -> Result<Message> {
        let path = std::str::from_utf8(data).map_err(|_| FxfsError::MalformedRequest)?;
        let inode = if path == "ctl" {
            CTL_INODE
        } else {
            self.fs.resolve(path)?
        };
        let handle = self.handles.open(inode)?;
        Ok(Message::ok(handle.to_le_bytes().to_vec()))
    }

    fn handle_create(&mut self, data: &[u8]) -> Result<Message> {
        if data.len() < 4 {
            return Err(FxfsError::MalformedRequest);
        }
        let flags = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let path = std::str::from_utf8(&data[4..]).map_err(|_| FxfsError::MalformedRequest)?;
        let inode = self.fs.create(path, flags & CREATE_DIR != 0)?;
        let handle = self.handles.open(inode)?;
        Ok(Message::ok(handle.to_le_bytes().to_vec()))
    }

    fn handle_read(&mut self, data: &[u8]) -> Result<Message> {
        if data.len() < 12 {
            return Err(FxfsError::MalformedRequest);
        }
        let handle = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let offset = u32::from_le_bytes(data[4..8].try_into().unwrap()) as u64;
        let count = u32::from_le_bytes(data[8..12].try_into().unwrap()).min(BLOCK_SIZE as u32);
        let inode = self.handles.inode_of(handle)?;

        let bytes = if inode == CTL_INODE {
            self.ctl_text(offset, count)
        } else {
            self.fs.read(inode, offset, count)?
        };
        Ok(Message::ok(bytes))
    }

    fn handle_write(&mut self, data: &[u8]) -> Result<Message> {
        if data.len() < 4 {
            return Err(FxfsError::MalformedRequest);
        }
        let handle = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let payload = &data[4..];
        let inode = self.handles.inode_of(handle)?;

        let written = if inode == CTL_INODE {
            payload.len() as u32
        } else {
            let cursor = self.handles.cursor_of(handle)?;
            let n = self.fs.write(inode, cursor, payload)?;
            self.handles.advance_cursor(handle, n as u64)?;
            n
        };
        Ok(Message::ok(written.to_le_bytes().to_vec()))
    }

    fn handle_close(&mut self, data: &[u8]) -> Result<Message> {
        if data.len() < 4 {
            return Err(FxfsError::MalformedRequest);
        }
        let handle = u32::from_le_bytes(data[0..4].try_into().unwrap());
        self.handles.close(handle);
        Ok(Message::ok(Vec::new()))
    }

    fn handle_stat(&mut self, data: &[u8]) -> Result<Message> {
        if data.len() < 4 {
            return Err(FxfsError::MalformedRequest);
        }
        let handle = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let inode = self.handles.inode_of(handle)?;

        let bytes = if inode == CTL_INODE {
            pack_stat(0, 0)
        } else {
            let item = self.fs.stat(inode)?;
            let file_type = if item.is_dir() { 1 } else { 0 };
            pack_stat(item.size.min(u32::MAX as u64) as u32, file_type)
        };
        Ok(Message::ok(bytes.to_vec()))
    }

    fn handle_remove(&mut self, data: &[u8]) -> Result<Message> {
        let path = std::str::from_utf8(data).map_err(|_| FxfsError::MalformedRequest)?;
        let removed = self.fs.remove(path)?;
        self.handles.deactivate_inode(removed);
        Ok(Message::ok(Vec::new()))
    }

    fn ctl_text(&mut self, offset: u64, count: u32) -> Vec<u8> {
        let free = self.fs.free_blocks().unwrap_or(0);
        let text = format!(
            "TOTAL={}\nFREE={}\nBSIZE=4096\n",
            self.fs.total_blocks(),
            free
        );
        let bytes = text.into_bytes();
        let start = (offset as usize).min(bytes.len());
        let end = (start + count as usize).min(bytes.len());
        bytes[start..end].to_vec()
    }
}
