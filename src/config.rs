// src/config.rs

//! Session defaults and startup-file handling.
//!
//! The startup files are plain command scripts: each non-empty,
//! non-comment line is fed to the command channel exactly as it would be
//! typed interactively. Only the first readable candidate is consulted, so
//! a personal file shadows the system-wide one completely.

use crate::commands::CommandChannel;
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Baseline settings applied before any startup file runs.
#[derive(Debug, Clone)]
pub struct Defaults {
    /// Session font, loaded once and shared by every screen's GC.
    pub font: String,
    /// Border width for the manager's own windows, in pixels.
    pub window_border_width: libc::c_uint,
    /// Seconds before a raised message bar hides itself.
    pub bar_timeout_secs: u32,
    /// Whether to announce readiness in the message bar at startup.
    pub startup_message: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            font: "9x15bold".to_string(),
            window_border_width: 1,
            bar_timeout_secs: 5,
            startup_message: true,
        }
    }
}

/// The startup files in priority order: the user's own file first, then the
/// system-wide fallback. `home` is `None` when `$HOME` is unset.
pub fn candidate_rc_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    if let Some(home) = home {
        candidates.push(home.join(".keywmrc"));
    }
    candidates.push(PathBuf::from("/etc/keywmrc"));
    candidates
}

/// Runs the first readable startup file through the command channel.
///
/// A missing or unreadable file is not an error; the manager simply starts
/// with its defaults.
pub fn read_startup_files(channel: &mut CommandChannel) {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    for path in candidate_rc_paths(home.as_deref()) {
        match File::open(&path) {
            Ok(file) => {
                info!("Reading startup commands from {}", path.display());
                read_rc(BufReader::new(file), &mut |line| {
                    channel.submit(line);
                });
                return;
            }
            Err(e) => debug!("Skipping startup file {}: {}", path.display(), e),
        }
    }
    debug!("No startup file found; using defaults");
}

/// Feeds each command line of `reader` to `submit`. Blank lines and lines
/// starting with `#` are skipped; a final line without a newline still runs.
pub fn read_rc<R: BufRead>(mut reader: R, submit: &mut dyn FnMut(&str)) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let command = line.trim_end_matches('\n').trim_end_matches('\r');
                if command.is_empty() || command.starts_with('#') {
                    continue;
                }
                submit(command);
            }
            Err(e) => {
                debug!("Stopping startup file read: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(input: &str) -> Vec<String> {
        let mut seen = Vec::new();
        read_rc(Cursor::new(input), &mut |line| seen.push(line.to_string()));
        seen
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let lines = collect("# banner\n\necho one\n   \n# trailing\necho two\n");
        // Whitespace-only lines are not blank and reach the channel as-is.
        assert_eq!(lines, vec!["echo one", "   ", "echo two"]);
    }

    #[test]
    fn final_line_without_newline_runs_once() {
        assert_eq!(collect("echo a\necho b"), vec!["echo a", "echo b"]);
    }

    #[test]
    fn crlf_endings_are_stripped() {
        assert_eq!(collect("echo a\r\necho b\r\n"), vec!["echo a", "echo b"]);
    }

    #[test]
    fn candidates_prefer_home_then_system() {
        let with_home = candidate_rc_paths(Some(Path::new("/home/me")));
        assert_eq!(
            with_home,
            vec![
                PathBuf::from("/home/me/.keywmrc"),
                PathBuf::from("/etc/keywmrc")
            ]
        );
        assert_eq!(
            candidate_rc_paths(None),
            vec![PathBuf::from("/etc/keywmrc")]
        );
    }

    #[test]
    fn first_readable_file_shadows_the_rest() {
        use crate::commands::{CommandDispatcher, CommandOutcome};
        use std::io::Write as _;
        use std::rc::Rc;
        use std::cell::RefCell;

        let dir = tempfile::tempdir().expect("tempdir");
        let rc_path = dir.path().join(".keywmrc");
        let mut file = File::create(&rc_path).expect("create rc");
        writeln!(file, "echo from-file").expect("write rc");

        struct Recorder(Rc<RefCell<Vec<String>>>);
        impl CommandDispatcher for Recorder {
            fn dispatch(&mut self, input: &str) -> CommandOutcome {
                self.0.borrow_mut().push(input.to_string());
                CommandOutcome::Empty
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut channel = CommandChannel::new(Box::new(Recorder(Rc::clone(&seen))));

        let file = File::open(&rc_path).expect("open rc");
        read_rc(BufReader::new(file), &mut |line| {
            channel.submit(line);
        });
        assert_eq!(*seen.borrow(), vec!["echo from-file"]);
    }
}
