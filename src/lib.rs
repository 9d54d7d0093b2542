//! Warden - epoll-driven static file server
//!
//! A single reactor thread multiplexes every client socket; a bounded worker
//! pool parses and resolves requests, with each job holding one pooled
//! credential-store session. Responses are a header buffer plus a read-only
//! mapping of the served file.

pub mod config;
pub mod http;
pub mod pool;
pub mod server;
pub mod store;
pub mod timer;
