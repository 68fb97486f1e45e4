// ADSMITH Pipeline Stages
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Stages never touch ProjectState directly: they receive a read-only
// context, do their fan-out, and hand back an acceptance structure the
// orchestrator applies between transitions.

pub mod audio;
pub mod compose;
pub mod image;
pub mod motion;

use crate::config::ProjectConfig;
use crate::executor::{CancelToken, ParallelExecutor};
use crate::providers::ProviderSet;
use crate::store::{ArtifactStore, CritiqueCache};
use crate::style::StyleProfile;
use std::sync::Arc;

/// How a completed stage left the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageVerdict {
    Clean,
    /// Succeeded with per-scene/per-line degradations worth surfacing.
    Warned(Vec<String>),
    /// Stage-fatal; the orchestrator flips the project to `failed`.
    Failed(String),
}

impl StageVerdict {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageVerdict::Failed(_))
    }
}

/// A log line produced inside a stage, applied to `ProjectState.logs` by
/// the orchestrator in scene order.
#[derive(Debug, Clone)]
pub struct StageLog {
    pub tag: String,
    pub message: String,
}

impl StageLog {
    pub fn new(tag: &str, message: impl Into<String>) -> Self {
        Self {
            tag: tag.to_string(),
            message: message.into(),
        }
    }
}

/// Everything a stage is allowed to see. Cloned cheaply; the heavy members
/// are shared.
#[derive(Clone)]
pub struct StageContext {
    pub providers: Arc<ProviderSet>,
    pub store: Arc<ArtifactStore>,
    pub critique_cache: Arc<CritiqueCache>,
    pub executor: Arc<ParallelExecutor>,
    pub cancel: CancelToken,
    pub config: ProjectConfig,
    pub style: StyleProfile,
    pub seed: u64,
}
