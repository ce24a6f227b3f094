//! Local IPC layer for `analysis-supervisor-ctl`.
//!
//! A named pipe (Windows) or Unix domain socket (Linux/macOS) accepting
//! JSON-line commands from the companion CLI.

pub mod server;
