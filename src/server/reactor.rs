//! The single-threaded readiness loop.
//!
//! One thread owns the epoll instance, the connection table and the timer
//! list. It accepts, reads, writes and evicts; parsing and resolution run on
//! the worker pool. Connection sockets are edge-triggered and one-shot, so a
//! connection produces no further events until whoever owns it rearms it.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use tracing::{debug, info, warn};

use super::listener;
use super::signal::{ControlEvent, ControlHandle, ControlPipe};
use crate::config::Config;
use crate::http::connection::{Flush, Owner, Processed, ReadStatus, SharedConn};
use crate::http::resolve::Resolver;
use crate::pool::WorkerPool;
use crate::store::{SessionPool, StoreSession};
use crate::timer::{TimerId, TimerList};

/// What an idle-eviction timer needs to find its connection.
#[derive(Debug, Clone, Copy)]
pub struct ClientData {
    pub fd: RawFd,
    pub peer: SocketAddr,
}

struct Slot {
    conn: Arc<SharedConn>,
    timer: TimerId,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    tick: Duration,
    idle: Duration,
    write_idle: Duration,
}

pub struct Server {
    epoll: Arc<Epoll>,
    listener: TcpListener,
    local_addr: SocketAddr,
    control: ControlPipe,
    workers: WorkerPool<Arc<SharedConn>>,
    conns: HashMap<RawFd, Slot>,
    timers: TimerList<ClientData>,
    timeouts: Timeouts,
    max_connections: usize,
    max_events: usize,
    stopping: bool,
}

fn interest(flags: EpollFlags) -> EpollFlags {
    flags | EpollFlags::EPOLLET | EpollFlags::EPOLLONESHOT | EpollFlags::EPOLLRDHUP
}

fn rearm(epoll: &Epoll, conn: &SharedConn, flags: EpollFlags) -> nix::Result<()> {
    let mut event = EpollEvent::new(interest(flags), conn.raw_fd() as u64);
    epoll.modify(conn.fd(), &mut event)
}

/// Worker-side half of a request: parse, resolve, stage, hand back.
fn serve(conn: &SharedConn, session: &mut dyn StoreSession, resolver: &Resolver, epoll: &Epoll) {
    let processed = conn.lock().process(resolver, session);
    if conn.is_closed() {
        return;
    }

    let (next, flags) = match processed {
        Processed::NeedMore => (Owner::Reactor, EpollFlags::EPOLLIN),
        Processed::Respond => (Owner::AwaitingWrite, EpollFlags::EPOLLOUT),
        Processed::Close => {
            // The reactor sees the hangup and evicts.
            conn.lock().shutdown();
            (Owner::Reactor, EpollFlags::EPOLLIN)
        }
    };
    if let Err(e) = conn.transition(Owner::Worker, next) {
        warn!(peer = %conn.peer(), error = %e, "Connection ownership violated");
        return;
    }
    if let Err(e) = rearm(epoll, conn, flags) {
        debug!(peer = %conn.peer(), error = %e, "Rearm failed");
    }
}

impl Server {
    /// Binds the listener and starts the worker pool. Nothing is served
    /// until [`Server::run`].
    pub fn new(config: &Config, resolver: Arc<Resolver>, sessions: Arc<SessionPool>) -> Result<Self> {
        let addr = config.listen_addr()?;
        let listener = listener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;

        let epoll = Arc::new(Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).context("epoll_create failed")?);
        epoll
            .add(&listener, EpollEvent::new(EpollFlags::EPOLLIN, listener.as_raw_fd() as u64))
            .context("failed to register listener")?;

        let control = ControlPipe::new().context("failed to create control pipe")?;
        epoll
            .add(&control, EpollEvent::new(EpollFlags::EPOLLIN, control.raw_fd() as u64))
            .context("failed to register control pipe")?;

        let worker_epoll = epoll.clone();
        let workers = WorkerPool::new(
            config.workers.threads,
            config.workers.max_requests,
            sessions,
            move |conn: Arc<SharedConn>, session: &mut Box<dyn StoreSession>| {
                serve(&conn, session.as_mut(), &resolver, &worker_epoll)
            },
        )
        .context("failed to start worker pool")?;

        let server = &config.server;
        Ok(Self {
            epoll,
            listener,
            local_addr,
            control,
            workers,
            conns: HashMap::new(),
            timers: TimerList::new(),
            timeouts: Timeouts {
                tick: server.tick(),
                idle: server.idle_timeout(),
                write_idle: server.write_idle_timeout(),
            },
            max_connections: server.max_connections,
            max_events: server.max_events,
            stopping: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> ControlHandle {
        self.control.handle()
    }

    /// The pipe signal handlers should write into.
    pub fn control_pipe(&self) -> &ControlPipe {
        &self.control
    }

    pub fn connections(&self) -> usize {
        self.conns.len()
    }

    /// Runs until a shutdown event arrives.
    pub fn run(&mut self) -> Result<()> {
        info!(
            addr = %self.local_addr,
            tick_secs = self.timeouts.tick.as_secs_f64(),
            workers = self.workers.threads(),
            "Server running"
        );
        let listener_fd = self.listener.as_raw_fd();
        let control_fd = self.control.raw_fd();
        let mut events = vec![EpollEvent::empty(); self.max_events];
        let mut control = Vec::new();

        while !self.stopping {
            let n = match self.epoll.wait(&mut events, EpollTimeout::NONE) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("epoll_wait failed"),
            };

            for event in &events[..n] {
                let fd = event.data() as RawFd;
                let flags = event.events();
                if fd == listener_fd {
                    self.accept_all();
                } else if fd == control_fd {
                    if let Err(e) = self.control.drain(&mut control) {
                        warn!(error = %e, "Failed to read control pipe");
                    }
                } else if flags.intersects(
                    EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR,
                ) {
                    self.evict(fd);
                } else if flags.contains(EpollFlags::EPOLLIN) {
                    self.on_readable(fd);
                } else if flags.contains(EpollFlags::EPOLLOUT) {
                    self.on_writable(fd);
                }
            }

            for event in control.drain(..) {
                match event {
                    ControlEvent::Tick => self.sweep(Instant::now()),
                    ControlEvent::Shutdown => {
                        info!("Shutdown requested");
                        self.stopping = true;
                    }
                }
            }
        }

        for (_, slot) in self.conns.drain() {
            self.timers.remove(slot.timer);
            Self::close(&self.epoll, &slot.conn);
        }
        info!("Server stopped");
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.conns.len() >= self.max_connections {
            warn!(%peer, limit = self.max_connections, "Connection limit reached, rejecting");
            return;
        }
        if let Err(e) = listener::configure(&stream) {
            warn!(%peer, error = %e, "Failed to configure socket");
            return;
        }

        let conn = Arc::new(SharedConn::new(stream, peer));
        let fd = conn.raw_fd();
        let event = EpollEvent::new(interest(EpollFlags::EPOLLIN), fd as u64);
        if let Err(e) = self.epoll.add(conn.fd(), event) {
            warn!(%peer, error = %e, "Failed to register connection");
            return;
        }
        let timer = self
            .timers
            .insert(Instant::now() + self.timeouts.idle, ClientData { fd, peer });
        self.conns.insert(fd, Slot { conn, timer });
        debug!(%peer, fd, live = self.conns.len(), "Accepted connection");
    }

    fn on_readable(&mut self, fd: RawFd) {
        let Some(slot) = self.conns.get(&fd) else {
            return;
        };
        let (conn, timer) = (slot.conn.clone(), slot.timer);
        if conn.owner() != Owner::Reactor {
            debug!(peer = %conn.peer(), owner = ?conn.owner(), "Readable while not owned");
            return;
        }

        match conn.lock().read_available() {
            Ok(ReadStatus::Data(_)) => {}
            Ok(ReadStatus::PeerClosed) => {
                debug!(peer = %conn.peer(), "Peer closed");
                self.evict(fd);
                return;
            }
            Err(e) => {
                debug!(peer = %conn.peer(), error = %e, "Read failed");
                self.evict(fd);
                return;
            }
        }

        if let Err(e) = conn.transition(Owner::Reactor, Owner::Worker) {
            warn!(peer = %conn.peer(), error = %e, "Connection ownership violated");
            return;
        }
        match self.workers.submit(conn) {
            Ok(()) => {
                self.timers.adjust(timer, Instant::now() + self.timeouts.idle);
            }
            Err(e) => {
                // Not rearmed: the connection sits until idle eviction.
                warn!(queued = self.workers.queued(), error = %e, "Request dropped");
                let _ = e.into_job().transition(Owner::Worker, Owner::Reactor);
            }
        }
    }

    fn on_writable(&mut self, fd: RawFd) {
        let Some(slot) = self.conns.get(&fd) else {
            return;
        };
        let (conn, timer) = (slot.conn.clone(), slot.timer);
        if conn.owner() != Owner::AwaitingWrite {
            debug!(peer = %conn.peer(), owner = ?conn.owner(), "Writable while not owned");
            return;
        }

        let flushed = conn.lock().flush();
        let rearmed = match flushed {
            Ok(Flush::Blocked) => rearm(&self.epoll, &conn, EpollFlags::EPOLLOUT),
            Ok(Flush::Done { keep_alive: true }) => {
                if let Err(e) = conn.transition(Owner::AwaitingWrite, Owner::Reactor) {
                    warn!(peer = %conn.peer(), error = %e, "Connection ownership violated");
                    self.evict(fd);
                    return;
                }
                rearm(&self.epoll, &conn, EpollFlags::EPOLLIN)
            }
            Ok(Flush::Done { keep_alive: false }) => {
                self.evict(fd);
                return;
            }
            Err(e) => {
                debug!(peer = %conn.peer(), error = %e, "Write failed");
                self.evict(fd);
                return;
            }
        };

        match rearmed {
            Ok(()) => {
                self.timers.adjust(timer, Instant::now() + self.timeouts.write_idle);
            }
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, "Rearm failed");
                self.evict(fd);
            }
        }
    }

    /// Evicts every connection whose idle timer is due at `now`.
    pub fn sweep(&mut self, now: Instant) {
        let mut expired = Vec::new();
        let fired = self.timers.sweep(now, |_, data| expired.push(data));
        for data in expired {
            if let Some(slot) = self.conns.remove(&data.fd) {
                debug!(peer = %data.peer, "Idle connection evicted");
                Self::close(&self.epoll, &slot.conn);
            }
        }
        if fired > 0 {
            debug!(evicted = fired, live = self.conns.len(), "Timer sweep");
        }
    }

    fn evict(&mut self, fd: RawFd) {
        if let Some(slot) = self.conns.remove(&fd) {
            self.timers.remove(slot.timer);
            Self::close(&self.epoll, &slot.conn);
            debug!(peer = %slot.conn.peer(), live = self.conns.len(), "Connection closed");
        }
    }

    // The descriptor itself closes when the last reference drops, which may
    // be a worker still finishing with it.
    fn close(epoll: &Epoll, conn: &SharedConn) {
        conn.mark_closed();
        if let Err(e) = epoll.delete(conn.fd()) {
            debug!(peer = %conn.peer(), error = %e, "epoll delete failed");
        }
    }
}
