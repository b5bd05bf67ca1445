// src/main.rs

pub mod commands;
pub mod config;
pub mod ipc;
pub mod os;
pub mod wm;

use crate::commands::BuiltinDispatcher;
use crate::config::Defaults;
use crate::wm::atoms::ControlAtoms;
use crate::wm::{Connection, EventRouter, WindowManager};
use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use log::info;
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "keywm",
    version,
    disable_version_flag = true,
    about = "Keyboard-driven X11 window manager"
)]
struct Cli {
    /// Send a command to the running instance instead of starting one.
    /// May be given multiple times; commands run in order.
    #[arg(short = 'c', long = "command", value_name = "TEXT")]
    command: Vec<String>,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

fn main() {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            // print() routes help/version to stdout and errors to stderr.
            let _ = e.print();
            process::exit(code);
        }
    };

    let result = if cli.command.is_empty() {
        run_manager()
    } else {
        send_commands(&cli.command)
    };

    if let Err(e) = result {
        eprintln!("keywm: {:#}", e);
        process::exit(1);
    }
}

/// Client mode: deliver each command to the running instance and print the
/// replies. A command error delivered by the manager is output, not a client
/// failure; only transport problems (no display, no answer) exit non-zero.
fn send_commands(commands: &[String]) -> Result<()> {
    let connection = Connection::open().context("Cannot open display")?;
    let atoms =
        ControlAtoms::intern(&connection).context("Cannot resolve the command channel atoms")?;
    for command in commands {
        if let Some(reply) = ipc::send_command(&connection, &atoms, command)? {
            println!("{}", reply);
        }
    }
    Ok(())
}

/// Manager mode: claim the screens and run until told to stop.
fn run_manager() -> Result<()> {
    info!("Starting keywm {}", env!("CARGO_PKG_VERSION"));

    let connection = Connection::open().context("Cannot open display")?;
    os::signals::install().context("Cannot install signal handlers")?;

    let defaults = Defaults::default();
    let startup_message = defaults.startup_message;
    let mut manager = WindowManager::new(connection, defaults, Box::new(BuiltinDispatcher))?;
    manager.load_startup_commands();
    if startup_message {
        info!("Welcome to keywm. Hit `C-t ?` for help.");
    }
    manager.focus_key_window();

    let mut router = EventRouter::default();
    manager.run(&mut router)
}
