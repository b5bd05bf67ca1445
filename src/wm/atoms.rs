// src/wm/atoms.rs

//! Interned X atoms: the fixed identifier vocabulary the manager shares with
//! other clients.
//!
//! Two groups, both resolved exactly once at startup and immutable
//! afterwards: the standard window-manager interop atoms, and the three
//! private atoms that make up the command channel's entire wire contract.
//! Any client that resolves the same three names talks to the running
//! instance.

#![allow(non_snake_case)] // For X11 types

use super::connection::Connection;
use anyhow::{Context, Result};
use libc::c_char;
use x11::xlib;

/// Standard ICCCM atoms used when talking to managed applications.
#[derive(Debug, Clone, Copy)]
pub struct WmAtoms {
    pub state: xlib::Atom,
    pub change_state: xlib::Atom,
    pub protocols: xlib::Atom,
    pub delete_window: xlib::Atom,
    pub take_focus: xlib::Atom,
    pub colormap_windows: xlib::Atom,
}

impl WmAtoms {
    /// Interns the standard group. Failure is fatal; the manager cannot
    /// speak the window-manager protocols without these tokens.
    pub fn intern(connection: &Connection) -> Result<Self> {
        Ok(Self {
            state: intern_atom(connection, "WM_STATE")?,
            change_state: intern_atom(connection, "WM_CHANGE_STATE")?,
            protocols: intern_atom(connection, "WM_PROTOCOLS")?,
            delete_window: intern_atom(connection, "WM_DELETE_WINDOW")?,
            take_focus: intern_atom(connection, "WM_TAKE_FOCUS")?,
            colormap_windows: intern_atom(connection, "WM_COLORMAP_WINDOWS")?,
        })
    }
}

/// The command channel's private atoms.
///
/// `command` tags the request payload property, `command_request` tags the
/// client-message broadcast on the root, `command_result` tags the reply
/// property. These three names are the whole IPC compatibility contract.
#[derive(Debug, Clone, Copy)]
pub struct ControlAtoms {
    pub command: xlib::Atom,
    pub command_request: xlib::Atom,
    pub command_result: xlib::Atom,
}

impl ControlAtoms {
    /// Interns the command-channel group. The short-lived client path only
    /// needs this group, never the standard one.
    pub fn intern(connection: &Connection) -> Result<Self> {
        Ok(Self {
            command: intern_atom(connection, "KEYWM_COMMAND")?,
            command_request: intern_atom(connection, "KEYWM_COMMAND_REQUEST")?,
            command_result: intern_atom(connection, "KEYWM_COMMAND_RESULT")?,
        })
    }
}

fn intern_atom(connection: &Connection, name: &str) -> Result<xlib::Atom> {
    let atom_name_cstr = std::ffi::CString::new(name)
        .with_context(|| format!("Failed to create CString for atom name '{}'", name))?;
    // SAFETY: `XInternAtom` is an FFI call; the display pointer is valid and
    // the name is a NUL-terminated C string. `xlib::False` asks the server
    // to create the atom if it does not exist, so the only failure mode is a
    // dead connection.
    let atom = unsafe {
        xlib::XInternAtom(
            connection.display(),
            atom_name_cstr.as_ptr() as *const c_char,
            xlib::False,
        )
    };
    // Protocol None; XInternAtom returns it when the request fails.
    if atom == 0 {
        Err(anyhow::anyhow!("Failed to intern X11 atom: {}", name))
    } else {
        Ok(atom)
    }
}
