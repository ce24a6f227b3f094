//! Domain model module declarations.

pub mod status;
pub mod version;
pub mod workspace;
