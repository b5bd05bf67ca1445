// src/wm/error.rs

//! The process-wide X error callback and the policies hanging off it.
//!
//! Xlib reports protocol errors through a callback registered with
//! `XSetErrorHandler`, invoked from inside the library with no user context.
//! The callback applies one of three dispositions:
//!
//! - a `BadAccess` reply to the root-window attribute change issued by the
//!   single-instance claim means another manager already holds substructure
//!   redirect on a screen: print the fixed diagnostic and exit immediately
//!   (nothing has been allocated yet, so no teardown runs);
//! - `BadWindow` while a [`BadWindowGuard`] is alive is expected (a client
//!   window raced its own destruction) and is dropped silently;
//! - everything else is recoverable: the message replaces the single
//!   pending-error slot and control returns to Xlib so the connection
//!   survives. The `lasterror` command consumes the slot later via
//!   [`take_pending_error`].

#![allow(non_snake_case)] // For X11 types

use libc::{c_char, c_int, c_uchar};
use log::error;
use once_cell::sync::Lazy;
use std::ffi::CStr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use x11::xlib;

/// Core protocol opcode for ChangeWindowAttributes (X11 Xproto).
/// `XSelectInput` is implemented in terms of this request.
const X_CHANGE_WINDOW_ATTRIBUTES: c_uchar = 2;

/// At most one server error message is retained at a time; a newer error
/// replaces (and frees) the previous one.
static PENDING_ERROR: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// While set, BadWindow errors are discarded instead of recorded.
static SUPPRESS_BAD_WINDOW: AtomicBool = AtomicBool::new(false);

/// What the error callback decides to do with a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Another client already holds substructure redirect: fatal.
    DuplicateInstance,
    /// A suppressed BadWindow from an operation racing window destruction.
    Suppressed,
    /// Any other error: keep the message, keep running.
    Recorded,
}

/// Pure classification of an X error, split out from the callback so the
/// policy is testable without a server.
pub fn classify(request_code: c_uchar, error_code: c_uchar, suppress_bad_window: bool) -> Disposition {
    if request_code == X_CHANGE_WINDOW_ATTRIBUTES && error_code == xlib::BadAccess as c_uchar {
        return Disposition::DuplicateInstance;
    }
    if suppress_bad_window && error_code == xlib::BadWindow as c_uchar {
        return Disposition::Suppressed;
    }
    Disposition::Recorded
}

/// Registers the error callback. Must run before the first server request,
/// so the single-instance claim's BadAccess lands here and nowhere else.
pub fn install() {
    // SAFETY: registering a process-wide handler; the handler itself only
    // touches statics designed for this.
    unsafe { xlib::XSetErrorHandler(Some(handle_x_error)) };
}

unsafe extern "C" fn handle_x_error(
    display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    let event = &*event;
    match classify(
        event.request_code,
        event.error_code,
        SUPPRESS_BAD_WINDOW.load(Ordering::Relaxed),
    ) {
        Disposition::DuplicateInstance => {
            eprintln!("keywm: there can be only ONE.");
            // No manager resources exist yet; skip teardown entirely.
            process::exit(1);
        }
        Disposition::Suppressed => 0,
        Disposition::Recorded => {
            let mut text_buf = [0 as c_char; 128];
            xlib::XGetErrorText(
                display,
                event.error_code as c_int,
                text_buf.as_mut_ptr(),
                text_buf.len() as c_int,
            );
            let text = CStr::from_ptr(text_buf.as_ptr())
                .to_string_lossy()
                .into_owned();
            error!(
                "X error: {} (request {}.{}, resource {:#x})",
                text, event.request_code, event.minor_code, event.resourceid
            );
            record_error(text);
            0
        }
    }
}

/// Stores `message` as the pending error, dropping any previous one.
pub(crate) fn record_error(message: String) {
    let mut slot = PENDING_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(message);
}

/// Consumes the most recent server error message, if any. Fatal errors
/// never reach this slot.
pub fn take_pending_error() -> Option<String> {
    let mut slot = PENDING_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    slot.take()
}

/// Suppresses BadWindow errors for the guard's lifetime.
///
/// Held around operations that reference windows owned by other clients and
/// may therefore race their destruction (e.g. answering a command request
/// from a client that already exited).
#[derive(Debug)]
pub struct BadWindowGuard(());

impl BadWindowGuard {
    pub fn new() -> Self {
        SUPPRESS_BAD_WINDOW.store(true, Ordering::Relaxed);
        BadWindowGuard(())
    }
}

impl Drop for BadWindowGuard {
    fn drop(&mut self) {
        SUPPRESS_BAD_WINDOW.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_instance_matches_only_the_exact_pair() {
        assert_eq!(
            classify(X_CHANGE_WINDOW_ATTRIBUTES, xlib::BadAccess as c_uchar, false),
            Disposition::DuplicateInstance
        );
        // Same error on a different request is an ordinary error.
        assert_eq!(
            classify(42, xlib::BadAccess as c_uchar, false),
            Disposition::Recorded
        );
        // Same request with a different error is an ordinary error.
        assert_eq!(
            classify(X_CHANGE_WINDOW_ATTRIBUTES, xlib::BadWindow as c_uchar, false),
            Disposition::Recorded
        );
    }

    #[test]
    fn bad_window_is_dropped_only_under_suppression() {
        assert_eq!(
            classify(15, xlib::BadWindow as c_uchar, true),
            Disposition::Suppressed
        );
        assert_eq!(
            classify(15, xlib::BadWindow as c_uchar, false),
            Disposition::Recorded
        );
        // Suppression never hides other error kinds.
        assert_eq!(classify(15, 8, true), Disposition::Recorded);
    }

    // The pending slot and the suppression flag are process-wide statics, so
    // their state transitions live in one sequential test.
    #[test]
    fn pending_error_slot_and_guard_lifecycle() {
        let _ = take_pending_error();

        record_error("first".to_string());
        record_error("second".to_string());
        // The newest message replaced the older one.
        assert_eq!(take_pending_error().as_deref(), Some("second"));
        assert_eq!(take_pending_error(), None);

        assert!(!SUPPRESS_BAD_WINDOW.load(Ordering::Relaxed));
        {
            let _guard = BadWindowGuard::new();
            assert!(SUPPRESS_BAD_WINDOW.load(Ordering::Relaxed));
            // With suppression active a BadWindow never touches the slot.
            assert_eq!(
                classify(3, xlib::BadWindow as c_uchar, true),
                Disposition::Suppressed
            );
            assert_eq!(take_pending_error(), None);
        }
        assert!(!SUPPRESS_BAD_WINDOW.load(Ordering::Relaxed));
    }
}
