// src/ipc.rs

//! The property-based command channel between a short-lived client
//! invocation and the running manager.
//!
//! Protocol, from the client's side:
//!
//! 1. create a throwaway 1x1 unmapped window and select property events on
//!    it;
//! 2. write the command text into the `KEYWM_COMMAND` property of that
//!    window;
//! 3. send a `KEYWM_COMMAND_REQUEST` client message to the root window,
//!    carrying the throwaway window's id, with the substructure-notify mask
//!    so the running manager (which holds that mask on every root) receives
//!    it;
//! 4. wait for a `PropertyNotify` announcing a new `KEYWM_COMMAND_RESULT`
//!    value on the throwaway window, then read and delete it.
//!
//! The manager answers by reading-and-deleting the command property,
//! running the text through the command channel, and writing the outcome
//! into the result property of the requesting window. An empty result
//! property means success with no output.
//!
//! The wait in step 4 is bounded: if no manager answers within
//! [`REPLY_TIMEOUT`], no instance is running (or it is wedged) and the
//! client reports that instead of hanging forever.

#![allow(non_snake_case)] // For X11 types

use crate::commands::CommandChannel;
use crate::os::monitor::{ConnectionMonitor, WaitOutcome};
use crate::wm::atoms::ControlAtoms;
use crate::wm::connection::Connection;
use crate::wm::error::BadWindowGuard;
use anyhow::{anyhow, Context, Result};
use libc::{c_int, c_long, c_uchar, c_ulong};
use log::{debug, warn};
use std::mem;
use std::ptr;
use std::slice;
use std::time::{Duration, Instant};
use x11::xlib;

/// How long a client waits for the running instance to answer.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// `PropertyNotify.state` value for a property that gained a new value.
const PROPERTY_NEW_VALUE: c_int = 0;

/// Builds the request broadcast: a 32-bit-format client message carrying the
/// requesting window's id in its first data slot.
fn build_request_event(
    request_atom: xlib::Atom,
    root: xlib::Window,
    request_window: xlib::Window,
) -> xlib::XClientMessageEvent {
    // SAFETY: XClientMessageEvent is plain old data; every field read by the
    // server is set below.
    let mut event: xlib::XClientMessageEvent = unsafe { mem::zeroed() };
    event.type_ = xlib::ClientMessage;
    event.window = root;
    event.message_type = request_atom;
    event.format = 32;
    event.data.set_long(0, request_window as c_long);
    event
}

/// Pulls the requesting window's id back out of a request broadcast.
pub(crate) fn request_window_of(event: &xlib::XClientMessageEvent) -> xlib::Window {
    event.data.get_long(0) as xlib::Window
}

/// Sends one command to the running instance and returns its reply text
/// (`None` when the command succeeded silently).
///
/// Fails if no instance answers within [`REPLY_TIMEOUT`].
pub fn send_command(
    connection: &Connection,
    atoms: &ControlAtoms,
    command: &str,
) -> Result<Option<String>> {
    let display = connection.display();
    // SAFETY: display is open; the window is destroyed before returning on
    // every path below.
    let (root, request_window) = unsafe {
        let root = xlib::XDefaultRootWindow(display);
        let window = xlib::XCreateSimpleWindow(display, root, 0, 0, 1, 1, 0, 0, 0);
        xlib::XSelectInput(display, window, xlib::PropertyChangeMask);
        (root, window)
    };

    // SAFETY: the property bytes are copied out by Xlib before the call
    // returns; the event struct is fully initialized by build_request_event.
    unsafe {
        xlib::XChangeProperty(
            display,
            request_window,
            atoms.command,
            xlib::XA_STRING,
            8,
            xlib::PropModeReplace,
            command.as_ptr(),
            command.len() as c_int,
        );
        let mut event = build_request_event(atoms.command_request, root, request_window);
        xlib::XSendEvent(
            display,
            root,
            xlib::False,
            xlib::SubstructureNotifyMask,
            &mut event as *mut xlib::XClientMessageEvent as *mut xlib::XEvent,
        );
    }
    connection.flush();
    debug!("Sent command request via window {:#x}", request_window);

    let reply = wait_for_result(connection, atoms, request_window);

    // SAFETY: the window id is ours and still valid.
    unsafe { xlib::XDestroyWindow(display, request_window) };
    connection.flush();
    reply
}

/// Blocks until the result property of `request_window` gains a value, then
/// reads it. Gives up after [`REPLY_TIMEOUT`].
fn wait_for_result(
    connection: &Connection,
    atoms: &ControlAtoms,
    request_window: xlib::Window,
) -> Result<Option<String>> {
    let fd = connection
        .event_fd()
        .ok_or_else(|| anyhow!("X connection closed while waiting for a reply"))?;
    let monitor = ConnectionMonitor::new(fd).context("Failed to watch the X connection")?;
    let deadline = Instant::now() + REPLY_TIMEOUT;

    loop {
        while connection.pending_events() > 0 {
            // SAFETY: pending_events > 0 guarantees XNextEvent returns
            // without blocking; the union field read is guarded by type_.
            let event = unsafe {
                let mut event: xlib::XEvent = mem::zeroed();
                xlib::XNextEvent(connection.display(), &mut event);
                event
            };
            // SAFETY: type_ discriminates the union.
            if unsafe { event.type_ } != xlib::PropertyNotify {
                continue;
            }
            // SAFETY: type_ was PropertyNotify.
            let property = unsafe { event.property };
            if property.window == request_window
                && property.atom == atoms.command_result
                && property.state == PROPERTY_NEW_VALUE
            {
                return Ok(read_string_property(
                    connection,
                    request_window,
                    atoms.command_result,
                )?);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(anyhow!(
                "No running instance answered within {} seconds",
                REPLY_TIMEOUT.as_secs()
            ));
        }
        let timeout_ms = remaining.as_millis().max(1) as c_int;
        match monitor.wait(timeout_ms)? {
            WaitOutcome::Ready | WaitOutcome::Interrupted => {}
            WaitOutcome::TimedOut => {
                return Err(anyhow!(
                    "No running instance answered within {} seconds",
                    REPLY_TIMEOUT.as_secs()
                ))
            }
        }
    }
}

/// Reads and deletes a string property. `Ok(None)` when the property is
/// absent or empty.
fn read_string_property(
    connection: &Connection,
    window: xlib::Window,
    atom: xlib::Atom,
) -> Result<Option<String>> {
    if !connection.is_open() {
        return Err(anyhow!("X connection is closed"));
    }
    let mut actual_type: xlib::Atom = 0;
    let mut actual_format: c_int = 0;
    let mut item_count: c_ulong = 0;
    let mut bytes_after: c_ulong = 0;
    let mut data: *mut c_uchar = ptr::null_mut();

    // SAFETY: out-pointers are all valid locals; the returned buffer is
    // copied and freed with XFree before returning.
    let status = unsafe {
        xlib::XGetWindowProperty(
            connection.display(),
            window,
            atom,
            0,
            c_long::MAX / 4,
            xlib::True,
            xlib::XA_STRING,
            &mut actual_type,
            &mut actual_format,
            &mut item_count,
            &mut bytes_after,
            &mut data,
        )
    };
    if status != xlib::Success as c_int {
        return Err(anyhow!("Failed to read property {:#x}", atom));
    }
    if data.is_null() || item_count == 0 {
        if !data.is_null() {
            // SAFETY: non-null pointers from XGetWindowProperty are freed
            // with XFree exactly once.
            unsafe { xlib::XFree(data as *mut _) };
        }
        return Ok(None);
    }
    // SAFETY: Xlib guarantees item_count bytes at `data` for format-8 data.
    let text = unsafe {
        let bytes = slice::from_raw_parts(data, item_count as usize);
        let text = String::from_utf8_lossy(bytes)
            .trim_end_matches('\0')
            .to_string();
        xlib::XFree(data as *mut _);
        text
    };
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// Manager-side handler for one command request broadcast.
///
/// The requesting client may die at any point, so the whole exchange runs
/// under a [`BadWindowGuard`]; a request from a vanished window is simply
/// dropped.
pub fn answer_request(
    connection: &Connection,
    atoms: &ControlAtoms,
    channel: &mut CommandChannel,
    event: &xlib::XClientMessageEvent,
) -> Result<()> {
    let request_window = request_window_of(event);
    let _guard = BadWindowGuard::new();

    // A failed read means the requester (or its property) is gone. That is
    // the client's problem, never grounds to stop managing.
    let command = match read_string_property(connection, request_window, atoms.command) {
        Ok(Some(command)) => command,
        Ok(None) => {
            warn!(
                "Command request from window {:#x} carried no command",
                request_window
            );
            return Ok(());
        }
        Err(e) => {
            warn!(
                "Dropping command request from window {:#x}: {}",
                request_window, e
            );
            return Ok(());
        }
    };

    debug!(
        "Running remote command {:?} for window {:#x}",
        command, request_window
    );
    let outcome = channel.submit(&command);
    let reply = outcome.as_reply();

    // SAFETY: the reply bytes are copied out by Xlib; a BadWindow from a
    // vanished requester is suppressed by the guard.
    unsafe {
        xlib::XChangeProperty(
            connection.display(),
            request_window,
            atoms.command_result,
            xlib::XA_STRING,
            8,
            xlib::PropModeReplace,
            reply.as_ptr(),
            reply.len() as c_int,
        );
    }
    connection.flush();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_event_round_trips_the_window_id() {
        let window: xlib::Window = 0x4a_0001;
        let event = build_request_event(77, 1, window);
        assert_eq!(event.type_, xlib::ClientMessage);
        assert_eq!(event.format, 32);
        assert_eq!(event.message_type, 77);
        assert_eq!(request_window_of(&event), window);
    }

    #[test]
    fn unreadable_request_is_dropped_without_dispatch() {
        struct Unreachable;
        impl crate::commands::CommandDispatcher for Unreachable {
            fn dispatch(&mut self, input: &str) -> crate::commands::CommandOutcome {
                panic!("dispatched {:?} for an unreadable request", input);
            }
        }

        // A request whose command property cannot be read (the requester is
        // gone) must be dropped, not turned into a manager-fatal error.
        let connection = Connection::closed_for_tests();
        let atoms = ControlAtoms {
            command: 1,
            command_request: 2,
            command_result: 3,
        };
        let mut channel = CommandChannel::new(Box::new(Unreachable));
        let event = build_request_event(atoms.command_request, 0, 0x5005);
        assert!(answer_request(&connection, &atoms, &mut channel, &event).is_ok());
    }
}
