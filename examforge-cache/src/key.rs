//! Structured cache keys.

use examforge_core::{ExamId, QuestionId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity a cached value belongs to or depends on, rendered `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn exam(id: ExamId) -> Self {
        Self::new("exam", id.to_string())
    }

    pub fn user(id: UserId) -> Self {
        Self::new("user", id.to_string())
    }

    pub fn question(id: QuestionId) -> Self {
        Self::new("question", id.to_string())
    }

    pub fn session(id: SessionId) -> Self {
        Self::new("session", id.to_string())
    }

    /// Prefix shared by every key owned by this entity.
    pub fn key_prefix(&self) -> String {
        format!("{}:{}:", self.kind, self.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A namespaced cache key: `{entityType}:{entityId}:{variant}`.
///
/// `dependencies` name further entities whose invalidation must also drop
/// this key, e.g. a per-user selection stored under an exam.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub entity: EntityRef,
    pub variant: String,
    pub dependencies: Vec<EntityRef>,
}

impl CacheKey {
    pub fn new(entity: EntityRef, variant: impl Into<String>) -> Self {
        Self {
            entity,
            variant: variant.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, entity: EntityRef) -> Self {
        if entity != self.entity && !self.dependencies.contains(&entity) {
            self.dependencies.push(entity);
        }
        self
    }

    /// The owning entity followed by its dependencies.
    pub fn entities(&self) -> impl Iterator<Item = &EntityRef> {
        std::iter::once(&self.entity).chain(self.dependencies.iter())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.variant)
    }
}
