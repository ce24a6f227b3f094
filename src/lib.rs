#![forbid(unsafe_code)]

//! Supervises one external static-analysis server per workspace: probes the
//! tool's version, launches it in server mode, reads its endpoint handshake
//! and hands the host a message channel bridged to the server.

pub mod config;
pub mod config_watcher;
pub mod errors;
pub mod ipc;
pub mod launcher;
pub mod models;
pub mod server;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use errors::{AppError, Result};
pub use supervisor::{Supervisor, SupervisorEvent};
