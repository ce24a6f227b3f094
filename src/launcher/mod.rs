//! Locating and spawning the external tool.
//!
//! - `resolver`: picks the command line for a workspace root.
//! - `process`: spawns it (optionally through a login shell) and owns the
//!   child until it is terminated.

pub mod process;
pub mod resolver;
