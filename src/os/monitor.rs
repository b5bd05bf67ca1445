// src/os/monitor.rs

//! Blocking wait on the X connection socket.
//!
//! The session loop and the command-channel client both need to sleep until
//! either the server has something to say or (for the session loop) a signal
//! interrupts the wait. This module wraps a single-fd `epoll` instance via
//! raw `libc` calls and distills the result into a [`WaitOutcome`] so callers
//! never busy-poll and never confuse an interruption with a timeout.

use anyhow::{Context, Result};
use log::{debug, trace, warn};
use std::io;
use std::os::unix::io::RawFd;

const EPOLL_CREATE_CLOEXEC: libc::c_int = libc::O_CLOEXEC;

/// Why a call to [`ConnectionMonitor::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watched descriptor is readable.
    Ready,
    /// The wait was interrupted by a signal (EINTR) before anything arrived.
    Interrupted,
    /// The requested timeout elapsed with no activity.
    TimedOut,
}

/// Watches the X connection's file descriptor for readability.
#[derive(Debug)]
pub struct ConnectionMonitor {
    epoll_fd: RawFd,
}

impl ConnectionMonitor {
    /// Creates a monitor registered for read readiness on `conn_fd`.
    ///
    /// The descriptor is not owned by the monitor; the X connection keeps it
    /// alive for as long as the monitor is used.
    pub fn new(conn_fd: RawFd) -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(EPOLL_CREATE_CLOEXEC) };
        if epoll_fd == -1 {
            return Err(io::Error::last_os_error())
                .context("Failed to create epoll instance (epoll_create1)");
        }

        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: conn_fd as u64,
        };
        if unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, conn_fd, &mut event) } == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(err)
                .with_context(|| format!("Failed to register fd {} with epoll", conn_fd));
        }

        debug!(
            "ConnectionMonitor created (epoll_fd: {}, watched fd: {})",
            epoll_fd, conn_fd
        );
        Ok(Self { epoll_fd })
    }

    /// Blocks until the watched descriptor is readable, a signal arrives, or
    /// the timeout elapses. A negative `timeout_ms` means wait indefinitely.
    pub fn wait(&self, timeout_ms: libc::c_int) -> Result<WaitOutcome> {
        trace!(
            "ConnectionMonitor: waiting on epoll_fd {} (timeout {}ms)",
            self.epoll_fd,
            timeout_ms
        );

        let mut event: libc::epoll_event = unsafe { std::mem::zeroed() };
        let num_events = unsafe { libc::epoll_wait(self.epoll_fd, &mut event, 1, timeout_ms) };

        if num_events == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("ConnectionMonitor: epoll_wait interrupted (EINTR)");
                return Ok(WaitOutcome::Interrupted);
            }
            return Err(err).context("epoll_wait failed in ConnectionMonitor");
        }

        if num_events == 0 {
            trace!("ConnectionMonitor: epoll_wait timed out");
            return Ok(WaitOutcome::TimedOut);
        }

        trace!("ConnectionMonitor: watched fd is readable");
        Ok(WaitOutcome::Ready)
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epoll_fd) } == -1 {
            warn!(
                "Failed to close epoll_fd {} in ConnectionMonitor::drop: {}",
                self.epoll_fd,
                io::Error::last_os_error()
            );
        } else {
            debug!("Closed epoll_fd {} in ConnectionMonitor::drop", self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe() failed");
        (fds[0], fds[1])
    }

    #[test_log::test]
    fn wait_times_out_when_nothing_arrives() {
        let (read_fd, write_fd) = pipe_pair();
        let monitor = ConnectionMonitor::new(read_fd).expect("monitor");
        assert_eq!(monitor.wait(20).expect("wait"), WaitOutcome::TimedOut);
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test_log::test]
    fn wait_reports_readiness_after_write() {
        let (read_fd, write_fd) = pipe_pair();
        let monitor = ConnectionMonitor::new(read_fd).expect("monitor");

        let written = unsafe { libc::write(write_fd, b"x".as_ptr() as *const libc::c_void, 1) };
        assert_eq!(written, 1);

        assert_eq!(monitor.wait(1000).expect("wait"), WaitOutcome::Ready);
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
