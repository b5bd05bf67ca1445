// src/os/mod.rs

//! Thin OS layer: the epoll-based connection monitor and the asynchronous
//! signal counters consumed by the session loop.

pub mod monitor;
pub mod signals;
