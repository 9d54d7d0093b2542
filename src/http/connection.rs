use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::http::parser::{ParseStatus, RequestParser};
use crate::http::request::Request;
use crate::http::resolve::{Outcome, Resolver};
use crate::http::writer::{ResponseWriter, WriteProgress};
use crate::store::StoreSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes appended to the read buffer by this call (possibly 0).
    Data(usize),
    PeerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// The request is incomplete; wait for more bytes.
    NeedMore,
    /// A response is staged; wait for writability.
    Respond,
    /// No response could be staged; drop the connection.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    Blocked,
    Done { keep_alive: bool },
}

/// Protocol state of one client connection.
#[derive(Debug)]
pub struct HttpConn {
    stream: TcpStream,
    peer: SocketAddr,
    parser: RequestParser,
    writer: ResponseWriter,
    keep_alive: bool,
}

impl HttpConn {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            parser: RequestParser::new(),
            writer: ResponseWriter::new(),
            keep_alive: false,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn request(&self) -> &Request {
        self.parser.request()
    }

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// Readies the connection for the next request on the same socket.
    pub fn reset(&mut self) {
        self.parser.reset();
        self.writer.release();
        self.keep_alive = false;
    }

    /// Drains the socket into the read buffer until it would block or the
    /// buffer is full. Edge-triggered readiness requires draining.
    pub fn read_available(&mut self) -> io::Result<ReadStatus> {
        let mut total = 0;
        loop {
            let buf = self.parser.buffer_mut();
            if buf.is_full() {
                return Ok(ReadStatus::Data(total));
            }
            match self.stream.read(buf.spare_mut()) {
                Ok(0) => return Ok(ReadStatus::PeerClosed),
                Ok(n) => {
                    self.parser.buffer_mut().advance(n);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadStatus::Data(total));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Parses what has been read and, once a request is complete (or
    /// malformed), stages the response.
    pub fn process(&mut self, resolver: &Resolver, session: &mut dyn StoreSession) -> Processed {
        let outcome = match self.parser.parse() {
            Ok(ParseStatus::Incomplete) => return Processed::NeedMore,
            Ok(ParseStatus::Complete) => {
                let request = self.parser.request_mut();
                let outcome = resolver.resolve(request, session);
                debug!(
                    peer = %self.peer,
                    method = ?request.method,
                    url = %request.url,
                    status = outcome.status().as_u16(),
                    "Request resolved"
                );
                outcome
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "Malformed request");
                Outcome::BadRequest
            }
        };

        // A parse error keeps whatever keep-alive the headers already set.
        self.keep_alive = self.parser.request().keep_alive;
        match self.writer.prepare(outcome, self.keep_alive) {
            Ok(()) => Processed::Respond,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Failed to stage response");
                Processed::Close
            }
        }
    }

    /// Writes the staged response. On completion the mapping is released
    /// and, for keep-alive, the connection is reset for the next request.
    pub fn flush(&mut self) -> io::Result<Flush> {
        if self.writer.bytes_to_send() == 0 {
            self.reset();
            return Ok(Flush::Done { keep_alive: true });
        }
        match self.writer.write_to(&mut self.stream) {
            Ok(WriteProgress::Blocked) => Ok(Flush::Blocked),
            Ok(WriteProgress::Done) => {
                let keep_alive = self.keep_alive;
                self.reset();
                Ok(Flush::Done { keep_alive })
            }
            Err(e) => {
                self.writer.release();
                Err(e)
            }
        }
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(peer = %self.peer, error = %e, "Socket shutdown failed");
        }
    }
}

/// Which side may touch a connection right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Owner {
    Reactor = 0,
    Worker = 1,
    AwaitingWrite = 2,
}

impl Owner {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Owner::Reactor,
            1 => Owner::Worker,
            _ => Owner::AwaitingWrite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnError {
    #[error("connection owned by {actual:?}, expected {expected:?}")]
    WrongOwner { expected: Owner, actual: Owner },
}

/// A connection shared between the reactor and the workers.
///
/// `owner` enforces that exactly one side acts on the connection at a time;
/// every hand-off is a compare-and-swap from the expected owner. `closed` is
/// set once the reactor has evicted the connection, so a worker still
/// holding a reference does not rearm a descriptor that is gone.
#[derive(Debug)]
pub struct SharedConn {
    fd: RawFd,
    peer: SocketAddr,
    owner: AtomicU8,
    closed: AtomicBool,
    conn: Mutex<HttpConn>,
}

impl SharedConn {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            peer,
            owner: AtomicU8::new(Owner::Reactor as u8),
            closed: AtomicBool::new(false),
            conn: Mutex::new(HttpConn::new(stream, peer)),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the socket is owned by `conn` and closes only when `self`
        // drops, which outlives the returned borrow.
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn owner(&self) -> Owner {
        Owner::from_u8(self.owner.load(Ordering::Acquire))
    }

    pub fn transition(&self, from: Owner, to: Owner) -> Result<(), ConnError> {
        self.owner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ConnError::WrongOwner {
                expected: from,
                actual: Owner::from_u8(actual),
            })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn lock(&self) -> MutexGuard<'_, HttpConn> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
