//! Self-pipe control channel.
//!
//! Signal handlers only write the signal number into a non-blocking pipe.
//! The reactor watches the read end like any other descriptor and turns
//! the bytes into [`ControlEvent`]s, handled after the current batch of
//! readiness events. [`ControlHandle`] writes the same bytes from ordinary
//! code, which is how tests drive ticks and shutdown.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use nix::fcntl::OFlag;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::pipe2;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// One tick has elapsed; sweep idle connections.
    Tick,
    Shutdown,
}

impl ControlEvent {
    fn from_byte(byte: u8) -> Option<Self> {
        match Signal::try_from(i32::from(byte)) {
            Ok(Signal::SIGALRM) => Some(ControlEvent::Tick),
            Ok(Signal::SIGTERM | Signal::SIGINT) => Some(ControlEvent::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ControlPipe {
    reader: File,
    writer: Arc<File>,
}

impl ControlPipe {
    pub fn new() -> io::Result<Self> {
        let (read_end, write_end) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        Ok(Self {
            reader: File::from(read_end),
            writer: Arc::new(File::from(write_end)),
        })
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            writer: self.writer.clone(),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Reads every pending byte. Unknown signal numbers are skipped.
    pub fn drain(&mut self, events: &mut Vec<ControlEvent>) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => events.extend(buf[..n].iter().filter_map(|&b| ControlEvent::from_byte(b))),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Routes `SIGALRM`, `SIGTERM` and `SIGINT` into this pipe and ignores
    /// `SIGPIPE`. Process-wide; call once, from `main`.
    pub fn install_handlers(&self) -> nix::Result<()> {
        PIPE_WRITE_FD.store(self.writer.as_raw_fd(), Ordering::Release);

        let forward = SigAction::new(
            SigHandler::Handler(forward_signal),
            SaFlags::SA_RESTART,
            SigSet::all(),
        );
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // SAFETY: `forward_signal` only calls async-signal-safe functions.
        unsafe {
            signal::sigaction(Signal::SIGPIPE, &ignore)?;
            for sig in [Signal::SIGALRM, Signal::SIGTERM, Signal::SIGINT] {
                signal::sigaction(sig, &forward)?;
            }
        }
        debug!("Signal handlers installed");
        Ok(())
    }
}

impl AsFd for ControlPipe {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}

/// Writes control events into a [`ControlPipe`] from any thread.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    writer: Arc<File>,
}

impl ControlHandle {
    pub fn tick(&self) -> io::Result<()> {
        self.send(Signal::SIGALRM)
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.send(Signal::SIGTERM)
    }

    fn send(&self, sig: Signal) -> io::Result<()> {
        match (&*self.writer).write(&[sig as i32 as u8]) {
            Ok(_) => Ok(()),
            // A full pipe already has events queued for the reactor.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

static PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_signal(sig: libc::c_int) {
    let fd = PIPE_WRITE_FD.load(Ordering::Acquire);
    if fd < 0 {
        return;
    }
    // SAFETY: errno is thread-local; write(2) is async-signal-safe.
    unsafe {
        let errno = libc::__errno_location();
        let saved = *errno;
        let byte = sig as u8;
        libc::write(fd, (&byte as *const u8).cast(), 1);
        *errno = saved;
    }
}

/// Starts a process-wide `SIGALRM` every `interval`.
pub fn start_ticker(interval: Duration) -> io::Result<()> {
    let period = libc::timeval {
        tv_sec: interval.as_secs() as libc::time_t,
        tv_usec: libc::suseconds_t::from(interval.subsec_micros() as i32),
    };
    let timer = libc::itimerval {
        it_interval: period,
        it_value: period,
    };
    // SAFETY: both pointers are valid for the duration of the call.
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    info!(interval_secs = interval.as_secs_f64(), "Tick timer started");
    Ok(())
}
