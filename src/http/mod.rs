//! HTTP protocol implementation.
//!
//! This module implements the per-connection HTTP/1.1 state machine driven
//! by the reactor and the worker pool.
//!
//! # Architecture
//!
//! - **`parser`**: fixed-size read buffer, CRLF line tokenizer and the
//!   three-state request parser
//! - **`request`**: the parsed request fields
//! - **`resolve`**: maps a parsed request to a static file or a credential
//!   store interaction
//! - **`file`**: stat/permission checks and read-only file mappings
//! - **`response`**: status codes, canned error bodies and header assembly
//! - **`writer`**: the two-segment scatter-gather write state
//! - **`connection`**: ties the above to one socket, plus the ownership tag
//!   shared between the reactor and the workers
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌──────────────────┐
//!        │ Reactor: read    │ ← drain the socket into the read buffer
//!        └──────┬───────────┘
//!               │ submit to worker pool
//!               ▼
//!        ┌──────────────────┐
//!        │ Worker: process  │ ← parse, resolve, assemble the response
//!        └──────┬───────────┘
//!               │ rearm writable (or readable when more bytes are needed)
//!               ▼
//!        ┌──────────────────┐
//!        │ Reactor: write   │ ← flush header + mapped file
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → reset, rearm readable
//!               └─ Close → evict
//! ```

pub mod connection;
pub mod file;
pub mod parser;
pub mod request;
pub mod resolve;
pub mod response;
pub mod writer;
