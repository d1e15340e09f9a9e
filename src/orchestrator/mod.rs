//! Worker lifecycle orchestration modules.
//!
//! Covers interpreter resolution, detached process spawning, post-launch
//! handshakes, the termination protocol, the self-healing watchdog loop,
//! and the supervisor facade that ties them together.

pub mod environment;
pub mod handshake;
pub mod spawner;
pub mod supervisor;
pub mod termination;
pub mod watchdog;
