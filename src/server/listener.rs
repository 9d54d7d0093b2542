use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

use nix::sys::socket::{setsockopt, sockopt};
use tracing::info;

/// Binds a non-blocking listening socket. std sets `SO_REUSEADDR` on Unix.
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    info!(addr = %listener.local_addr()?, "Listening");
    Ok(listener)
}

/// Puts an accepted socket into the mode the reactor expects.
pub fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    setsockopt(stream, sockopt::ReuseAddr, &true)?;
    Ok(())
}
