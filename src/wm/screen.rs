// src/wm/screen.rs

//! Per-screen server resources.
//!
//! Each X screen gets its own bundle: a GC, a cursor, a colormap reference
//! and the five service windows the manager draws into. Resource creation
//! follows a fixed order (queries first, then cursor, pixels, GC, windows)
//! and teardown releases in the reverse of that order, so a failure partway
//! through `init` never leaves half-owned XIDs behind the manager's back.

#![allow(non_snake_case)] // For X11 types

use super::connection::Connection;
use crate::config::Defaults;
use anyhow::{anyhow, Result};
use libc::{c_int, c_long, c_uint, c_ulong};
use log::{debug, warn};
use std::mem;
use x11::xlib;

/// Event mask selected on every root window at startup.
///
/// `SubstructureRedirectMask` doubles as the single-instance claim: the
/// server grants it to at most one client per screen, and a second claimant
/// receives BadAccess on this very request.
pub const MANAGER_EVENT_MASK: c_long = xlib::PropertyChangeMask
    | xlib::ColormapChangeMask
    | xlib::SubstructureRedirectMask
    | xlib::SubstructureNotifyMask;

/// Cursor shape from the standard cursor font (XC_icon in cursorfont.h).
const XC_ICON: c_uint = 64;

/// Selects the manager's event mask on every root window and syncs.
///
/// This must be the first batch of requests the process sends: the error
/// callback maps a BadAccess reply to these requests onto the
/// duplicate-instance exit, and the sync forces that reply to arrive before
/// any resources are allocated.
pub fn claim_screens(connection: &Connection) {
    for number in 0..connection.screen_count() {
        // SAFETY: display is open; XRootWindow with a valid screen number
        // cannot fail.
        unsafe {
            let root = xlib::XRootWindow(connection.display(), number as c_int);
            xlib::XSelectInput(connection.display(), root, MANAGER_EVENT_MASK);
        }
    }
    connection.sync();
    debug!("Claimed {} screen(s)", connection.screen_count());
}

/// Everything the manager owns on one X screen.
#[derive(Debug)]
pub struct Screen {
    pub number: usize,
    pub root: xlib::Window,
    pub colormap: xlib::Colormap,
    pub fg_pixel: c_ulong,
    pub bg_pixel: c_ulong,
    pub gc: xlib::GC,
    pub cursor: xlib::Cursor,
    /// Message bar; starts 1x1, resized as messages are shown.
    pub bar_window: xlib::Window,
    /// Invisible focus sink that receives top-level key events. Mapped.
    pub key_window: xlib::Window,
    /// Interactive text input line. Unmapped until needed.
    pub input_window: xlib::Window,
    /// Frame indicator drawn during frame navigation.
    pub frame_window: xlib::Window,
    /// Full-screen help overlay.
    pub help_window: xlib::Window,
    pub bar_is_raised: bool,
    pub width: c_int,
    pub height: c_int,
    /// `DISPLAY=` assignment for children spawned on this screen.
    pub display_env: String,
}

impl Screen {
    /// Creates the resource bundle for screen `number`.
    ///
    /// `font_id` is the shared session font; the GC references it but the
    /// screen does not own it.
    pub fn init(
        connection: &Connection,
        number: usize,
        font_id: xlib::Font,
        defaults: &Defaults,
    ) -> Result<Self> {
        let display = connection.display();

        // SAFETY: display is open and `number` is within XScreenCount.
        let (root, colormap) = unsafe {
            (
                xlib::XRootWindow(display, number as c_int),
                xlib::XDefaultColormap(display, number as c_int),
            )
        };

        // SAFETY: root is a live window; XGetWindowAttributes fills the
        // struct on success.
        let (width, height) = unsafe {
            let mut attrs: xlib::XWindowAttributes = mem::zeroed();
            if xlib::XGetWindowAttributes(display, root, &mut attrs) == 0 {
                return Err(anyhow!(
                    "Failed to query root window geometry for screen {}",
                    number
                ));
            }
            (attrs.width, attrs.height)
        };

        let display_env = display_env_for_screen(&connection.display_string(), number);

        // SAFETY: the remaining calls allocate server resources against the
        // open display; none of them return errors inline (protocol errors
        // go to the error callback).
        unsafe {
            let cursor = xlib::XCreateFontCursor(display, XC_ICON);
            let fg_pixel = xlib::XBlackPixel(display, number as c_int);
            let bg_pixel = xlib::XWhitePixel(display, number as c_int);

            let mut gcv: xlib::XGCValues = mem::zeroed();
            gcv.foreground = fg_pixel;
            gcv.background = bg_pixel;
            gcv.function = xlib::GXcopy;
            gcv.line_width = 1;
            gcv.subwindow_mode = xlib::IncludeInferiors;
            gcv.font = font_id;
            let gc_mask = (xlib::GCForeground
                | xlib::GCBackground
                | xlib::GCFunction
                | xlib::GCLineWidth
                | xlib::GCSubwindowMode
                | xlib::GCFont) as c_ulong;
            let gc = xlib::XCreateGC(display, root, gc_mask, &mut gcv);

            let border = defaults.window_border_width;

            let bar_window =
                xlib::XCreateSimpleWindow(display, root, 0, 0, 1, 1, border, fg_pixel, bg_pixel);

            // The key window keeps input focus whenever no client has it; it
            // must be mapped for focus assignment to succeed.
            let key_window =
                xlib::XCreateSimpleWindow(display, root, 0, 0, 1, 1, 0, bg_pixel, fg_pixel);
            xlib::XSelectInput(display, key_window, xlib::KeyPressMask);
            xlib::XMapWindow(display, key_window);

            let input_window =
                xlib::XCreateSimpleWindow(display, root, 0, 0, 1, 1, border, fg_pixel, bg_pixel);
            xlib::XSelectInput(display, input_window, xlib::KeyPressMask);

            let frame_window =
                xlib::XCreateSimpleWindow(display, root, 1, 1, 1, 1, border, fg_pixel, bg_pixel);

            let help_window = xlib::XCreateSimpleWindow(
                display,
                root,
                0,
                0,
                width as c_uint,
                height as c_uint,
                border,
                fg_pixel,
                bg_pixel,
            );
            xlib::XSelectInput(display, help_window, xlib::KeyPressMask);

            connection.sync();
            debug!(
                "Screen {} initialized ({}x{}, {})",
                number, width, height, display_env
            );

            Ok(Screen {
                number,
                root,
                colormap,
                fg_pixel,
                bg_pixel,
                gc,
                cursor,
                bar_window,
                key_window,
                input_window,
                frame_window,
                help_window,
                bar_is_raised: false,
                width,
                height,
                display_env,
            })
        }
    }

    /// Releases every server resource this screen owns. Idempotent, and a
    /// no-op once the connection is closed (a closed connection already
    /// released every XID server-side).
    pub fn cleanup(&mut self, connection: &Connection) {
        if !connection.is_open() {
            return;
        }
        let display = connection.display();
        // SAFETY: display is open; each XID is destroyed or freed at most
        // once because the fields are zeroed afterwards.
        unsafe {
            for window in [
                &mut self.bar_window,
                &mut self.key_window,
                &mut self.input_window,
                &mut self.frame_window,
                &mut self.help_window,
            ] {
                if *window != 0 {
                    xlib::XDestroyWindow(display, *window);
                    *window = 0;
                }
            }
            if self.cursor != 0 {
                xlib::XFreeCursor(display, self.cursor);
                self.cursor = 0;
            }
            if self.colormap != 0 {
                xlib::XFreeColormap(display, self.colormap);
                self.colormap = 0;
            }
            if !self.gc.is_null() {
                xlib::XFreeGC(display, self.gc);
                self.gc = std::ptr::null_mut();
            }
        }
        debug!("Screen {} resources released", self.number);
    }
}

/// Rewrites the screen suffix of a display string for a given screen, e.g.
/// `:0.0` becomes `:0.2` for screen 2. A string without a screen suffix is
/// passed through unchanged so children still reach the same server.
pub fn display_env_for_screen(base: &str, number: usize) -> String {
    if let Some(colon) = base.rfind(':') {
        if let Some(dot) = base[colon..].rfind('.') {
            let dot = colon + dot;
            return format!("DISPLAY={}.{}", &base[..dot], number);
        }
    }
    format!("DISPLAY={}", base)
}

/// Finds the screen whose root window is `root`.
pub fn find_screen(screens: &[Screen], root: xlib::Window) -> Option<&Screen> {
    let found = screens.iter().find(|s| s.root == root);
    if found.is_none() {
        warn!("No managed screen has root window {:#x}", root);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_env_replaces_screen_suffix() {
        assert_eq!(display_env_for_screen(":0.0", 2), "DISPLAY=:0.2");
        assert_eq!(
            display_env_for_screen("host.dom:0.1", 2),
            "DISPLAY=host.dom:0.2"
        );
    }

    #[test]
    fn find_screen_matches_on_root_window() {
        let screen = Screen {
            number: 1,
            root: 42,
            colormap: 0,
            fg_pixel: 0,
            bg_pixel: 0,
            gc: std::ptr::null_mut(),
            cursor: 0,
            bar_window: 0,
            key_window: 0,
            input_window: 0,
            frame_window: 0,
            help_window: 0,
            bar_is_raised: false,
            width: 800,
            height: 600,
            display_env: "DISPLAY=:0.1".to_string(),
        };
        let screens = vec![screen];
        assert_eq!(find_screen(&screens, 42).map(|s| s.number), Some(1));
        assert!(find_screen(&screens, 7).is_none());
    }

    #[test]
    fn display_env_without_suffix_is_unchanged() {
        assert_eq!(display_env_for_screen(":1", 3), "DISPLAY=:1");
        // A dot before the colon belongs to the hostname, not the screen.
        assert_eq!(
            display_env_for_screen("host.dom:1", 0),
            "DISPLAY=host.dom:1"
        );
        assert_eq!(display_env_for_screen("weird", 0), "DISPLAY=weird");
    }
}
