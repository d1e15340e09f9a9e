#![forbid(unsafe_code)]

//! `sim-warden` — process lifecycle supervisor for simulation workers.
//!
//! Launches out-of-process server and client workers, persists their
//! pids durably, terminates them with a graceful-then-forceful protocol,
//! and runs a single watchdog loop that restarts workers that die or
//! stop heartbeating.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
