//! Worker side: skills, skill sets and the executor loop.
//!
//! Core components:
//! - `skill`: the `Skill` trait and payload helpers
//! - `set`: name → skill lookup table for one role
//! - `catalog`: role → skill set factories
//! - `state`: executor phases and counters
//! - `executor`: the worker loop

pub mod catalog;
pub mod executor;
pub mod set;
pub mod skill;
pub mod state;

pub use catalog::SkillCatalog;
pub use executor::{NO_ACTIVE_ROLE, WorkerNode};
pub use set::SkillSet;
pub use skill::{Skill, SkillContext};
pub use state::{WorkerPhase, WorkerStats};
