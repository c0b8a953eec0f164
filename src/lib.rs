//! Skill mesh: a coordinator dispatching role-scoped skills to workers
//! over a lossy broadcast medium.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod session;
pub mod skills;
pub mod transport;
pub mod worker;

pub use error::{Error, Result};
