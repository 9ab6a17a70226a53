//! Pure, deterministic assistant logic.
//!
//! Nothing in this module touches the filesystem, processes, or the network.

pub mod backend;
pub mod decision;
pub mod suggestion;
