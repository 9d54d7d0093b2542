//! Listening socket, signal plumbing and the readiness loop.

pub mod listener;
pub mod reactor;
pub mod signal;

pub use reactor::Server;
pub use signal::{ControlEvent, ControlHandle, ControlPipe, start_ticker};
