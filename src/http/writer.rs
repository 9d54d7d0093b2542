use std::io::{self, IoSlice, Write};

use crate::http::file::MappedFile;
use crate::http::resolve::Outcome;
use crate::http::response::{BufferError, ResponseHead, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// The socket would block with bytes still pending.
    Blocked,
    Done,
}

/// Pending response: header bytes, then (for 200) the mapped file.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    head: ResponseHead,
    body: Option<MappedFile>,
    bytes_to_send: usize,
    bytes_sent: usize,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembles the response for `outcome`. A file outcome becomes two
    /// segments; every other outcome is one segment with a canned body.
    pub fn prepare(&mut self, outcome: Outcome, keep_alive: bool) -> Result<(), BufferError> {
        self.release();
        match outcome {
            Outcome::File(file) => {
                self.head.status_line(StatusCode::Ok)?;
                self.head.headers(file.len(), keep_alive)?;
                if !file.is_empty() {
                    self.body = Some(file);
                }
            }
            other => self.head.error_response(other.status(), keep_alive)?,
        }
        self.bytes_to_send = self.head.len() + self.body.as_ref().map_or(0, MappedFile::len);
        Ok(())
    }

    pub fn bytes_to_send(&self) -> usize {
        self.bytes_to_send
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn remaining(&self) -> usize {
        self.bytes_to_send - self.bytes_sent
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Writes until everything is sent or `out` would block.
    pub fn write_to<W: Write>(&mut self, out: &mut W) -> io::Result<WriteProgress> {
        while self.bytes_sent < self.bytes_to_send {
            let head = self.head.as_bytes();
            let body = self.body.as_ref().map_or(&[][..], MappedFile::as_slice);
            let result = if self.bytes_sent < head.len() {
                out.write_vectored(&[IoSlice::new(&head[self.bytes_sent..]), IoSlice::new(body)])
            } else {
                out.write_vectored(&[IoSlice::new(&body[self.bytes_sent - head.len()..])])
            };
            match result {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.bytes_sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(WriteProgress::Blocked);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(WriteProgress::Done)
    }

    /// Drops the header bytes and unmaps the file, if any.
    pub fn release(&mut self) {
        self.head.clear();
        self.body = None;
        self.bytes_to_send = 0;
        self.bytes_sent = 0;
    }
}
