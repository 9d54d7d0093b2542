//! Incremental HTTP request parser.
//!
//! Bytes accumulate in a fixed-capacity [`ReadBuffer`]. The line tokenizer
//! scans from where the previous call stopped, so a request split across
//! any number of reads is scanned exactly once. The parser moves through
//! `RequestLine → Header → Content` and never goes back until it is reset
//! for the next request on a kept-alive connection.

use std::fmt;
use std::ops::Range;

use thiserror::Error;

use crate::http::request::{Method, Request};

pub const READ_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line terminator is not CRLF")]
    MalformedLine,
    #[error("request line is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unsupported method")]
    InvalidMethod,
    #[error("unsupported HTTP version")]
    InvalidVersion,
    #[error("malformed request target")]
    InvalidTarget,
    #[error("read buffer exhausted before the request was complete")]
    BufferFull,
}

/// Result of scanning for the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    /// A full line; the range excludes the CRLF.
    Complete(Range<usize>),
    /// Ran out of bytes mid-line.
    Open,
    /// `\r` not followed by `\n`, or a bare `\n`.
    Bad,
}

/// Fixed-capacity receive buffer with the tokenizer's cursors.
///
/// `checked <= read_end <= capacity` always holds; `line_start` is where the
/// line currently being scanned begins.
pub struct ReadBuffer {
    data: Box<[u8]>,
    read_end: usize,
    checked: usize,
    line_start: usize,
}

impl fmt::Debug for ReadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("capacity", &self.data.len())
            .field("read_end", &self.read_end)
            .field("checked", &self.checked)
            .field("line_start", &self.line_start)
            .finish()
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new(READ_BUFFER_SIZE)
    }
}

impl ReadBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            read_end: 0,
            checked: 0,
            line_start: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn read_end(&self) -> usize {
        self.read_end
    }

    pub fn checked(&self) -> usize {
        self.checked
    }

    pub fn line_start(&self) -> usize {
        self.line_start
    }

    pub fn is_full(&self) -> bool {
        self.read_end == self.data.len()
    }

    /// Unfilled tail of the buffer, for the socket to read into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.read_end..]
    }

    /// Marks `n` bytes of the spare tail as received.
    pub fn advance(&mut self, n: usize) {
        self.read_end = (self.read_end + n).min(self.data.len());
    }

    /// Appends as much of `bytes` as fits and returns how much that was.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.data.len() - self.read_end);
        self.data[self.read_end..self.read_end + n].copy_from_slice(&bytes[..n]);
        self.read_end += n;
        n
    }

    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.data[range]
    }

    /// Received bytes from the start of the current line onwards.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.line_start..self.read_end]
    }

    pub fn clear(&mut self) {
        self.read_end = 0;
        self.checked = 0;
        self.line_start = 0;
    }

    /// Scans for the next CRLF from where the last scan stopped.
    pub fn find_line(&mut self) -> LineStatus {
        while self.checked < self.read_end {
            match self.data[self.checked] {
                b'\r' => {
                    if self.checked + 1 == self.read_end {
                        return LineStatus::Open;
                    }
                    if self.data[self.checked + 1] != b'\n' {
                        return LineStatus::Bad;
                    }
                    return self.complete_line(self.checked, self.checked + 2);
                }
                b'\n' => {
                    if self.checked > self.line_start && self.data[self.checked - 1] == b'\r' {
                        return self.complete_line(self.checked - 1, self.checked + 1);
                    }
                    return LineStatus::Bad;
                }
                _ => self.checked += 1,
            }
        }
        LineStatus::Open
    }

    fn complete_line(&mut self, end: usize, next: usize) -> LineStatus {
        let line = self.line_start..end;
        self.checked = next;
        self.line_start = next;
        LineStatus::Complete(line)
    }
}

/// Where the parser is within the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckState {
    #[default]
    RequestLine,
    Header,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are needed.
    Incomplete,
    /// A whole request has been parsed.
    Complete,
}

enum HeaderLine {
    End,
    Connection(bool),
    ContentLength(usize),
    Host(String),
    Other,
}

#[derive(Debug, Default)]
pub struct RequestParser {
    buf: ReadBuffer,
    state: CheckState,
    request: Request,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: ReadBuffer::new(capacity),
            ..Self::default()
        }
    }

    pub fn buffer(&self) -> &ReadBuffer {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut ReadBuffer {
        &mut self.buf
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Forgets the current request and all buffered bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = CheckState::RequestLine;
        self.request = Request::default();
    }

    /// Parses as far as the buffered bytes allow.
    pub fn parse(&mut self) -> Result<ParseStatus, ParseError> {
        loop {
            if self.state == CheckState::Content {
                return self.parse_content();
            }

            let range = match self.buf.find_line() {
                LineStatus::Complete(range) => range,
                LineStatus::Bad => return Err(ParseError::MalformedLine),
                LineStatus::Open if self.buf.is_full() => return Err(ParseError::BufferFull),
                LineStatus::Open => return Ok(ParseStatus::Incomplete),
            };
            let line = self.buf.slice(range);

            match self.state {
                CheckState::RequestLine => {
                    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
                    let (method, url) = parse_request_line(line)?;
                    self.request.method = method;
                    self.request.url = url;
                    self.request.version = "HTTP/1.1".to_string();
                    self.state = CheckState::Header;
                }
                CheckState::Header => match parse_header(line) {
                    HeaderLine::End if self.request.content_length != 0 => {
                        self.state = CheckState::Content;
                    }
                    HeaderLine::End => return Ok(ParseStatus::Complete),
                    HeaderLine::Connection(keep_alive) => self.request.keep_alive |= keep_alive,
                    HeaderLine::ContentLength(len) => self.request.content_length = len,
                    HeaderLine::Host(host) => self.request.host = Some(host),
                    HeaderLine::Other => {}
                },
                CheckState::Content => unreachable!("content is handled before line scanning"),
            }
        }
    }

    fn parse_content(&mut self) -> Result<ParseStatus, ParseError> {
        let start = self.buf.line_start();
        let len = self.request.content_length;
        let end = start.checked_add(len).ok_or(ParseError::BufferFull)?;
        if end > self.buf.capacity() {
            return Err(ParseError::BufferFull);
        }
        if self.buf.read_end() < end {
            return Ok(ParseStatus::Incomplete);
        }
        self.request.body = String::from_utf8_lossy(self.buf.slice(start..end)).into_owned();
        Ok(ParseStatus::Complete)
    }
}

const WHITESPACE: [char; 2] = [' ', '\t'];

/// Splits `METHOD TARGET VERSION` and normalizes the target to a path.
pub fn parse_request_line(line: &str) -> Result<(Method, String), ParseError> {
    let (method, rest) = line
        .split_once(WHITESPACE)
        .ok_or(ParseError::InvalidRequest)?;
    let method = Method::from_str(method).ok_or(ParseError::InvalidMethod)?;

    let rest = rest.trim_start_matches(WHITESPACE);
    let (target, version) = rest
        .split_once(WHITESPACE)
        .ok_or(ParseError::InvalidRequest)?;
    if version.trim_start_matches(WHITESPACE) != "HTTP/1.1" {
        return Err(ParseError::InvalidVersion);
    }

    Ok((method, normalize_target(target)?))
}

/// Reduces an absolute-form target (`http://host/path`) to its path and
/// maps `/` to `/index.html`.
pub fn normalize_target(target: &str) -> Result<String, ParseError> {
    let path = match target.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http://") => {
            let authority_and_path = &target[7..];
            let slash = authority_and_path.find('/').ok_or(ParseError::InvalidTarget)?;
            &authority_and_path[slash..]
        }
        _ => target,
    };

    if !path.starts_with('/') {
        return Err(ParseError::InvalidTarget);
    }
    if path == "/" {
        return Ok("/index.html".to_string());
    }
    Ok(path.to_string())
}

// Header lines stay raw bytes: only the values the server acts on are
// decoded, so an unknown header can carry anything.
fn parse_header(line: &[u8]) -> HeaderLine {
    if line.is_empty() {
        return HeaderLine::End;
    }
    if let Some(value) = header_value(line, b"Connection:") {
        return HeaderLine::Connection(value.eq_ignore_ascii_case(b"keep-alive"));
    }
    if let Some(value) = header_value(line, b"Content-Length:") {
        return HeaderLine::ContentLength(parse_length(value));
    }
    if let Some(value) = header_value(line, b"Host:") {
        return HeaderLine::Host(String::from_utf8_lossy(value).into_owned());
    }
    HeaderLine::Other
}

fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let prefix = line.get(..name.len())?;
    if !prefix.eq_ignore_ascii_case(name) {
        return None;
    }
    let value = &line[name.len()..];
    let start = value
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(value.len());
    Some(&value[start..])
}

// Leading decimal digits, like atol: "12abc" is 12, "abc" is 0. Values too
// large for usize saturate so they are rejected by the capacity check.
fn parse_length(value: &[u8]) -> usize {
    value
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .try_fold(0usize, |acc, &d| {
            acc.checked_mul(10)?.checked_add(usize::from(d - b'0'))
        })
        .unwrap_or(usize::MAX)
}
