//! Role → skill set factories.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SkillError;
use crate::protocol::Role;
use crate::skills;
use crate::worker::set::SkillSet;

type Factory = Arc<dyn Fn() -> SkillSet + Send + Sync>;

/// Which roles a worker can take, and how to build their skill sets.
///
/// Each activation builds a fresh set, so per-role state (learned facts,
/// recorded exchanges) starts empty when a worker is assigned again.
#[derive(Clone, Default)]
pub struct SkillCatalog {
    factories: HashMap<Role, Factory>,
}

impl SkillCatalog {
    /// A catalog with no roles at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in sets for the four core roles.
    pub fn builtin() -> Self {
        Self::empty()
            .with(Role::Language, skills::language::skill_set)
            .with(Role::Knowledge, skills::knowledge::skill_set)
            .with(Role::Memory, skills::memory::skill_set)
            .with(Role::Response, skills::response::skill_set)
    }

    /// Add or replace the factory for `role`.
    pub fn with(mut self, role: Role, factory: impl Fn() -> SkillSet + Send + Sync + 'static) -> Self {
        self.factories.insert(role, Arc::new(factory));
        self
    }

    pub fn supports(&self, role: Role) -> bool {
        self.factories.contains_key(&role)
    }

    /// Roles this catalog can activate, in declaration order.
    pub fn roles(&self) -> Vec<Role> {
        Role::ALL
            .iter()
            .copied()
            .filter(|role| self.supports(*role))
            .collect()
    }

    /// Build the skill set for `role`.
    pub fn activate(&self, role: Role) -> Result<SkillSet, SkillError> {
        let factory = self
            .factories
            .get(&role)
            .ok_or(SkillError::NoHandlerSet { role })?;
        let set = factory();
        tracing::debug!(role = %role, skills = ?set.list(), "Activated skill set");
        Ok(set)
    }
}

impl std::fmt::Debug for SkillCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillCatalog")
            .field("roles", &self.roles())
            .finish()
    }
}
