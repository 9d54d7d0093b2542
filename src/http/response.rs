use std::fmt::Write as _;

use bytes::BytesMut;
use thiserror::Error;

pub const WRITE_BUFFER_SIZE: usize = 1024;

const HTTP_VERSION: &str = "HTTP/1.1";

/// HTTP status codes the server produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 500 Internal Error
    InternalError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use warden::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalError => 500,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalError => "Internal Error",
        }
    }

    /// Fixed body sent with an error status. Empty for 200, whose body is
    /// the served file.
    pub fn canned_body(&self) -> &'static str {
        match self {
            StatusCode::Ok => "",
            StatusCode::BadRequest => {
                "Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            StatusCode::Forbidden => "You do not have permission to get file from this server.\n",
            StatusCode::NotFound => "The requested file was not found on this server.\n",
            StatusCode::InternalError => {
                "There was an unusual problem serving the requested file.\n"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("response header does not fit in {limit} bytes")]
pub struct BufferError {
    pub limit: usize,
}

/// Bounded staging area for the status line, headers and canned bodies.
#[derive(Debug)]
pub struct ResponseHead {
    buf: BytesMut,
    limit: usize,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self::new(WRITE_BUFFER_SIZE)
    }
}

impl ResponseHead {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit),
            limit,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn status_line(&mut self, status: StatusCode) -> Result<(), BufferError> {
        self.append(format_args!(
            "{} {} {}\r\n",
            HTTP_VERSION,
            status.as_u16(),
            status.reason_phrase()
        ))
    }

    /// `Content-Length`, `Content-Type`, `Connection` and the blank line.
    pub fn headers(&mut self, content_length: usize, keep_alive: bool) -> Result<(), BufferError> {
        self.append(format_args!("Content-Length: {content_length}\r\n"))?;
        self.append(format_args!("Content-Type: text/html\r\n"))?;
        let connection = if keep_alive { "keep-alive" } else { "close" };
        self.append(format_args!("Connection: {connection}\r\n"))?;
        self.append(format_args!("\r\n"))
    }

    pub fn content(&mut self, body: &str) -> Result<(), BufferError> {
        self.append(format_args!("{body}"))
    }

    /// A complete single-segment error response.
    pub fn error_response(&mut self, status: StatusCode, keep_alive: bool) -> Result<(), BufferError> {
        let body = status.canned_body();
        self.status_line(status)?;
        self.headers(body.len(), keep_alive)?;
        self.content(body)
    }

    // All-or-nothing: a write that would cross the limit leaves the buffer
    // as it was.
    fn append(&mut self, args: std::fmt::Arguments<'_>) -> Result<(), BufferError> {
        let mark = self.buf.len();
        if self.buf.write_fmt(args).is_err() || self.buf.len() > self.limit {
            self.buf.truncate(mark);
            return Err(BufferError { limit: self.limit });
        }
        Ok(())
    }
}
