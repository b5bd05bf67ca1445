// src/wm/mod.rs

//! Window manager core: the X connection, interned atoms, the process-wide
//! error policy, per-screen resources, and the session that ties them into
//! a control loop.

pub mod atoms;
pub mod connection;
pub mod error;
pub mod screen;
pub mod session;

pub use connection::Connection;
pub use session::{EventRouter, WindowManager};
