//! Issue agent: turns GitHub issue labels into a work queue for a
//! code-generation tool.

pub mod config;
pub mod daemon;
pub mod error;
pub mod execution;
pub mod job;
pub mod logging;
pub mod poller;
pub mod tracker;
