// src/wm/session.rs

//! The manager session: owns every server resource and runs the control
//! loop that merges X events with signal observations.

#![allow(non_snake_case)] // For X11 types

use super::atoms::{ControlAtoms, WmAtoms};
use super::connection::Connection;
use super::error;
use super::screen::{self, Screen};
use crate::commands::{CommandChannel, CommandDispatcher};
use crate::config::{self, Defaults};
use crate::ipc;
use crate::os::monitor::ConnectionMonitor;
use crate::os::signals::{self, SignalLedger};
use anyhow::{anyhow, Context, Result};
use libc::c_int;
use log::{debug, info, trace, warn};
use std::ffi::CString;
use std::mem;
use std::ptr;
use x11::xlib;

/// Focus revert target when no client window holds focus.
const POINTER_ROOT: xlib::Window = 1;
const REVERT_TO_POINTER_ROOT: c_int = 1;

/// Where the control loop currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// A reload was requested; startup files are re-read, then back to
    /// `Running`.
    Reloading,
    Terminating,
}

/// Receives the events the session loop does not consume itself.
///
/// The session keeps the command request handling for itself; everything
/// else (maps, unmaps, key presses, property changes on clients) goes here.
pub trait EventDelegate {
    fn handle_event(&mut self, connection: &Connection, event: &xlib::XEvent);
    /// Called on each timer tick.
    fn tick(&mut self, connection: &Connection);
}

/// Default delegate: traces events and does nothing else yet.
#[derive(Debug, Default)]
pub struct EventRouter;

impl EventDelegate for EventRouter {
    fn handle_event(&mut self, _connection: &Connection, event: &xlib::XEvent) {
        // SAFETY: type_ is valid for every event the server delivers.
        trace!("Unrouted event: {}", event_name(unsafe { event.type_ }));
    }

    fn tick(&mut self, _connection: &Connection) {
        trace!("Timer tick");
    }
}

fn event_name(kind: c_int) -> &'static str {
    match kind {
        xlib::KeyPress => "KeyPress",
        xlib::KeyRelease => "KeyRelease",
        xlib::ButtonPress => "ButtonPress",
        xlib::MapRequest => "MapRequest",
        xlib::MapNotify => "MapNotify",
        xlib::UnmapNotify => "UnmapNotify",
        xlib::DestroyNotify => "DestroyNotify",
        xlib::ConfigureRequest => "ConfigureRequest",
        xlib::ConfigureNotify => "ConfigureNotify",
        xlib::PropertyNotify => "PropertyNotify",
        xlib::ColormapNotify => "ColormapNotify",
        xlib::ClientMessage => "ClientMessage",
        xlib::CreateNotify => "CreateNotify",
        xlib::ReparentNotify => "ReparentNotify",
        xlib::FocusIn => "FocusIn",
        xlib::FocusOut => "FocusOut",
        xlib::Expose => "Expose",
        _ => "Other",
    }
}

/// The running manager instance.
pub struct WindowManager {
    connection: Connection,
    #[allow(dead_code)] // Interned at startup, consumed by client messaging.
    wm_atoms: WmAtoms,
    control_atoms: ControlAtoms,
    defaults: Defaults,
    font: *mut xlib::XFontStruct,
    screens: Vec<Screen>,
    channel: CommandChannel,
    ledger: SignalLedger,
    state: RunState,
    cleaned_up: bool,
}

impl WindowManager {
    /// Claims every screen and builds the session's resources.
    ///
    /// The order is load-bearing: the error callback must be in place before
    /// the screen claim, and the claim (with its sync) must precede any
    /// resource allocation so a duplicate instance exits owning nothing.
    pub fn new(
        connection: Connection,
        defaults: Defaults,
        dispatcher: Box<dyn CommandDispatcher>,
    ) -> Result<Self> {
        error::install();
        screen::claim_screens(&connection);

        let wm_atoms = WmAtoms::intern(&connection).context("Failed to intern ICCCM atoms")?;
        let control_atoms =
            ControlAtoms::intern(&connection).context("Failed to intern command atoms")?;

        let font = load_font(&connection, &defaults.font)?;
        // SAFETY: load_font returned a non-null XFontStruct.
        let font_id = unsafe { (*font).fid };

        let mut screens = Vec::with_capacity(connection.screen_count());
        for number in 0..connection.screen_count() {
            screens.push(
                Screen::init(&connection, number, font_id, &defaults)
                    .with_context(|| format!("Failed to initialize screen {}", number))?,
            );
        }
        info!(
            "Managing {} screen(s) on {}",
            screens.len(),
            connection.display_string()
        );

        Ok(Self {
            connection,
            wm_atoms,
            control_atoms,
            defaults,
            font,
            screens,
            channel: CommandChannel::new(dispatcher),
            ledger: SignalLedger::new(),
            state: RunState::Running,
            cleaned_up: false,
        })
    }

    /// Runs the startup files through the command channel.
    pub fn load_startup_commands(&mut self) {
        config::read_startup_files(&mut self.channel);
    }

    /// Parks input focus on the first screen's key window so top-level key
    /// bindings work before any client is focused.
    pub fn focus_key_window(&self) {
        if let Some(first) = self.screens.first() {
            // SAFETY: display and key window are valid.
            unsafe {
                xlib::XSetInputFocus(
                    self.connection.display(),
                    first.key_window,
                    REVERT_TO_POINTER_ROOT,
                    xlib::CurrentTime,
                );
            }
            self.connection.flush();
        }
    }

    /// The control loop. Returns when a termination signal is observed, then
    /// tears the session down.
    pub fn run(&mut self, delegate: &mut dyn EventDelegate) -> Result<()> {
        let fd = self
            .connection
            .event_fd()
            .ok_or_else(|| anyhow!("X connection closed before the control loop started"))?;
        let monitor =
            ConnectionMonitor::new(fd).context("Failed to watch the X connection")?;
        signals::arm_timer(self.defaults.bar_timeout_secs);

        while matches!(self.state, RunState::Running | RunState::Reloading) {
            self.drain_events(delegate)?;
            self.connection.flush();

            // Signals are consulted before blocking: one that arrived during
            // the event drain must act now, not after the next X event.
            let observed = self.ledger.observe();
            if observed.terminate > 0 {
                if observed.terminate > 1 {
                    warn!(
                        "{} termination signals arrived before shutdown began",
                        observed.terminate
                    );
                }
                info!("Termination signal received; shutting down");
                self.state = RunState::Terminating;
                break;
            }
            if observed.reload > 0 {
                info!("Reload signal received; re-reading startup files");
                self.state = RunState::Reloading;
                self.load_startup_commands();
                self.state = RunState::Running;
            }
            if observed.timer > 0 {
                delegate.tick(&self.connection);
                signals::arm_timer(self.defaults.bar_timeout_secs);
            }

            // Block only when nothing is actionable. A signal that landed
            // after the observation above keeps the ledger noisy and skips
            // the wait entirely.
            if self.connection.pending_events() == 0 && self.ledger.is_quiet() {
                monitor.wait(-1)?;
            }
        }

        self.teardown();
        Ok(())
    }

    fn drain_events(&mut self, delegate: &mut dyn EventDelegate) -> Result<()> {
        while self.connection.pending_events() > 0 {
            // SAFETY: pending_events > 0 guarantees XNextEvent does not
            // block; the union reads below are guarded by type_.
            let event = unsafe {
                let mut event: xlib::XEvent = mem::zeroed();
                xlib::XNextEvent(self.connection.display(), &mut event);
                event
            };
            // SAFETY: type_ discriminates the union.
            let kind = unsafe { event.type_ };
            if kind == xlib::ClientMessage {
                // SAFETY: type_ was ClientMessage.
                let message = unsafe { event.client_message };
                if message.message_type == self.control_atoms.command_request
                    && message.format == 32
                {
                    ipc::answer_request(
                        &self.connection,
                        &self.control_atoms,
                        &mut self.channel,
                        &message,
                    )?;
                    continue;
                }
            }
            delegate.handle_event(&self.connection, &event);
        }
        Ok(())
    }

    /// Releases everything in the reverse of the acquisition order: screen
    /// bundles, the shared font, input focus, then the connection itself.
    /// Runs exactly once; later calls are no-ops.
    fn teardown(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        debug!("Tearing down the session");

        for screen in &mut self.screens {
            screen.cleanup(&self.connection);
        }
        if self.connection.is_open() {
            // SAFETY: display is open; the font pointer came from
            // XLoadQueryFont and is freed once.
            unsafe {
                if !self.font.is_null() {
                    xlib::XFreeFont(self.connection.display(), self.font);
                    self.font = ptr::null_mut();
                }
                xlib::XSetInputFocus(
                    self.connection.display(),
                    POINTER_ROOT,
                    REVERT_TO_POINTER_ROOT,
                    xlib::CurrentTime,
                );
            }
            self.connection.sync();
        }
        if let Err(e) = self.connection.cleanup() {
            warn!("Error closing the X connection: {}", e);
        }
        info!("Session teardown complete");
    }
}

impl Drop for WindowManager {
    fn drop(&mut self) {
        // Safety net for error paths; the normal exit already tore down.
        self.teardown();
    }
}

fn load_font(connection: &Connection, name: &str) -> Result<*mut xlib::XFontStruct> {
    let font_name = CString::new(name)
        .with_context(|| format!("Invalid font name {:?}", name))?;
    // SAFETY: display is open and the name is NUL-terminated; a null return
    // means the server has no such font.
    let font = unsafe { xlib::XLoadQueryFont(connection.display(), font_name.as_ptr()) };
    if font.is_null() {
        Err(anyhow!("Unknown font: {}", name))
    } else {
        Ok(font)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_cover_the_loop_relevant_kinds() {
        assert_eq!(event_name(xlib::ClientMessage), "ClientMessage");
        assert_eq!(event_name(xlib::PropertyNotify), "PropertyNotify");
        assert_eq!(event_name(xlib::MapRequest), "MapRequest");
        assert_eq!(event_name(9999), "Other");
    }
}
