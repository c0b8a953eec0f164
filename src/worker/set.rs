//! Skill sets: the name → skill table a worker activates for its role.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::Role;
use crate::worker::skill::Skill;

/// Lookup table of the skills one role exposes.
///
/// Built once at role activation; lookups are by exact name only.
#[derive(Clone)]
pub struct SkillSet {
    role: Role,
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillSet {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            skills: HashMap::new(),
        }
    }

    /// Register a skill, replacing any skill of the same name.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        if self.skills.insert(name.clone(), skill).is_some() {
            tracing::warn!(role = %self.role, skill = %name, "Replaced existing skill");
        } else {
            tracing::debug!(role = %self.role, skill = %name, "Registered skill");
        }
    }

    /// Builder form of [`SkillSet::register`].
    pub fn with(mut self, skill: impl Skill + 'static) -> Self {
        self.register(Arc::new(skill));
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    /// Skill names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.skills.len()
    }
}

impl std::fmt::Debug for SkillSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillSet")
            .field("role", &self.role)
            .field("skills", &self.list())
            .finish()
    }
}
