// src/wm/connection.rs
#![allow(non_snake_case)] // Allow non-snake case for X11 types

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::ffi::CStr;
use std::os::unix::io::RawFd;
use std::ptr;

use x11::xlib;

/// Holds the raw `*mut xlib::Display` and closes it on drop.
#[derive(Debug)]
struct ManagedDisplay {
    ptr: *mut xlib::Display,
}

impl ManagedDisplay {
    /// Opens a connection to the X server named by `DISPLAY`.
    fn open() -> Result<Self> {
        // SAFETY: passing NULL makes Xlib consult the DISPLAY environment
        // variable; a null return means no connection was made.
        let ptr = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if ptr.is_null() {
            Err(anyhow!(
                "Failed to open X display. Check DISPLAY environment variable or X server status."
            ))
        } else {
            debug!("X display opened: {:p}", ptr);
            Ok(Self { ptr })
        }
    }

    fn close(&mut self) {
        if !self.ptr.is_null() {
            info!("Closing X display connection {:p}", self.ptr);
            // SAFETY: the pointer came from XOpenDisplay and has not been
            // closed yet; it is nulled immediately after.
            let status = unsafe { xlib::XCloseDisplay(self.ptr) };
            if status != 0 {
                warn!("XCloseDisplay returned non-zero status: {}", status);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        self.close();
    }
}

/// The process-wide handle to the X server session.
///
/// Exactly one `Connection` exists per process; every other component
/// borrows it. All XIDs handed out by the server are meaningless once the
/// connection is closed, which is why teardown closes it last.
#[derive(Debug)]
pub struct Connection {
    managed_display: ManagedDisplay,
}

impl Connection {
    /// Connects to the X server.
    pub fn open() -> Result<Self> {
        let managed_display = ManagedDisplay::open()?;
        info!("X server connection established.");
        Ok(Connection { managed_display })
    }

    /// Returns the raw display pointer for Xlib calls.
    ///
    /// # Safety
    ///
    /// The pointer is only valid while the `Connection` is open; callers
    /// must not hold it across `cleanup()` or drop.
    #[inline]
    pub fn display(&self) -> *mut xlib::Display {
        self.managed_display.ptr
    }

    /// Whether the connection is still open.
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.managed_display.ptr.is_null()
    }

    /// Number of screens the server exposes on this connection.
    pub fn screen_count(&self) -> usize {
        // SAFETY: XScreenCount only reads connection metadata.
        unsafe { xlib::XScreenCount(self.display()) as usize }
    }

    /// The display string the connection was opened with (e.g. `:0.0`).
    pub fn display_string(&self) -> String {
        // SAFETY: XDisplayString returns a pointer into the Display struct
        // that lives as long as the connection; copied out immediately.
        unsafe { CStr::from_ptr(xlib::XDisplayString(self.display())) }
            .to_string_lossy()
            .into_owned()
    }

    /// The connection's file descriptor, for readiness polling.
    pub fn event_fd(&self) -> Option<RawFd> {
        if self.managed_display.ptr.is_null() {
            warn!("event_fd called on a closed X display.");
            None
        } else {
            // SAFETY: XConnectionNumber is safe with a valid display.
            Some(unsafe { xlib::XConnectionNumber(self.display()) })
        }
    }

    /// Flushes buffered requests and waits for the server to process them,
    /// so that any errors they raised reach the error callback now.
    pub fn sync(&self) {
        if self.is_open() {
            // SAFETY: display is valid and open.
            unsafe { xlib::XSync(self.display(), xlib::False) };
        }
    }

    /// Flushes buffered requests without waiting.
    pub fn flush(&self) {
        if self.is_open() {
            // SAFETY: display is valid and open.
            unsafe { xlib::XFlush(self.display()) };
        }
    }

    /// Number of events already read from the socket plus whatever can be
    /// read without blocking.
    pub fn pending_events(&self) -> i32 {
        if !self.is_open() {
            return 0;
        }
        // SAFETY: display is valid and open.
        unsafe { xlib::XPending(self.display()) }
    }

    /// Handle with no live display, for exercising closed-connection paths.
    #[cfg(test)]
    pub(crate) fn closed_for_tests() -> Self {
        Connection {
            managed_display: ManagedDisplay {
                ptr: ptr::null_mut(),
            },
        }
    }

    /// Closes the connection. Idempotent; called exactly once from session
    /// teardown (the `Drop` impl is only a safety net for error paths).
    pub fn cleanup(&mut self) -> Result<()> {
        if self.managed_display.ptr.is_null() {
            info!("X display connection already closed; cleanup skipped.");
        } else {
            self.managed_display.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that talk to a live X server are deliberately absent; these
    // cover the closed-connection paths only.

    fn closed_connection() -> Connection {
        Connection::closed_for_tests()
    }

    #[test]
    fn cleanup_is_idempotent_on_closed_connection() {
        let mut conn = closed_connection();
        assert!(conn.cleanup().is_ok());
        assert!(conn.cleanup().is_ok());
        assert!(!conn.is_open());
    }

    #[test]
    fn event_fd_is_none_on_closed_connection() {
        let conn = closed_connection();
        assert!(conn.event_fd().is_none());
    }

    #[test]
    fn pending_events_is_zero_on_closed_connection() {
        let conn = closed_connection();
        assert_eq!(conn.pending_events(), 0);
    }
}
