// src/commands.rs

//! The command channel: the single entry point through which every command
//! reaches the manager, whether it came from a key binding, a startup file,
//! or another process over the X property protocol.
//!
//! The channel itself is transport-agnostic; interpretation is behind the
//! [`CommandDispatcher`] trait so the session can be driven with a recording
//! stub in tests.

use log::debug;

/// Result of running one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command produced text for the caller.
    Output(String),
    /// The command succeeded with nothing to say.
    Empty,
    /// The command failed; the message travels back like output does.
    Error(String),
}

impl CommandOutcome {
    /// The text a remote caller receives. Success without output is the
    /// empty string.
    pub fn as_reply(&self) -> &str {
        match self {
            CommandOutcome::Output(text) | CommandOutcome::Error(text) => text,
            CommandOutcome::Empty => "",
        }
    }
}

/// Interprets one command line. Implementations must not assume anything
/// about where the line came from.
pub trait CommandDispatcher {
    fn dispatch(&mut self, input: &str) -> CommandOutcome;
}

/// Funnel for command input from every source.
pub struct CommandChannel {
    dispatcher: Box<dyn CommandDispatcher>,
}

impl CommandChannel {
    pub fn new(dispatcher: Box<dyn CommandDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Submits one command line, passed to the dispatcher unmodified.
    pub fn submit(&mut self, input: &str) -> CommandOutcome {
        debug!("Command submitted: {:?}", input);
        self.dispatcher.dispatch(input)
    }
}

/// The built-in command set.
#[derive(Debug, Default)]
pub struct BuiltinDispatcher;

impl CommandDispatcher for BuiltinDispatcher {
    fn dispatch(&mut self, input: &str) -> CommandOutcome {
        let trimmed = input.trim();
        let (name, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (trimmed, ""),
        };
        match name {
            "" => CommandOutcome::Empty,
            "echo" => {
                if rest.is_empty() {
                    CommandOutcome::Empty
                } else {
                    CommandOutcome::Output(rest.to_string())
                }
            }
            "version" => CommandOutcome::Output(format!(
                "{} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            )),
            // Consumes the most recent recoverable X error, if any.
            "lasterror" => match crate::wm::error::take_pending_error() {
                Some(message) => CommandOutcome::Output(message),
                None => CommandOutcome::Empty,
            },
            other => CommandOutcome::Error(format!("unknown command: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingDispatcher {
        seen: Rc<RefCell<Vec<String>>>,
    }

    impl CommandDispatcher for RecordingDispatcher {
        fn dispatch(&mut self, input: &str) -> CommandOutcome {
            self.seen.borrow_mut().push(input.to_string());
            CommandOutcome::Empty
        }
    }

    #[test]
    fn channel_forwards_input_unmodified() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut channel = CommandChannel::new(Box::new(RecordingDispatcher {
            seen: Rc::clone(&seen),
        }));
        channel.submit("echo  spacing preserved ");
        channel.submit("");
        assert_eq!(*seen.borrow(), vec!["echo  spacing preserved ", ""]);
    }

    #[test]
    fn builtin_echo_returns_its_argument() {
        let mut dispatcher = BuiltinDispatcher;
        assert_eq!(
            dispatcher.dispatch("echo hello world"),
            CommandOutcome::Output("hello world".to_string())
        );
        assert_eq!(dispatcher.dispatch("echo"), CommandOutcome::Empty);
    }

    #[test]
    fn builtin_version_names_the_package() {
        let mut dispatcher = BuiltinDispatcher;
        match dispatcher.dispatch("version") {
            CommandOutcome::Output(text) => assert!(text.starts_with("keywm ")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn unknown_command_is_an_error_with_reply_text() {
        let mut dispatcher = BuiltinDispatcher;
        let outcome = dispatcher.dispatch("frobnicate now");
        assert_eq!(
            outcome,
            CommandOutcome::Error("unknown command: frobnicate".to_string())
        );
        assert_eq!(outcome.as_reply(), "unknown command: frobnicate");
        assert_eq!(CommandOutcome::Empty.as_reply(), "");
    }
}
