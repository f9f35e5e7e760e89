//! Ambient support crate shared by the tunnel remote endpoint services:
//! structured logging, config loading and a handful of small utilities.
//! Kept deliberately thin — protocol logic lives in `remote_core`.

pub mod config;
pub mod error;
pub mod logging;
pub mod rand;
