//! Failures that end a pipeline stage.
//!
//! Backend hiccups (AI, embeddings) never show up here: they are absorbed by
//! falling back at the call site. Single-item failures are counted in the
//! stage reports instead.

use std::fmt;

/// A pipeline stage, as reported in run state and stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Collecting,
    Deduplicating,
    Analyzing,
    Delivering,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Collecting => "collecting",
            Stage::Deduplicating => "deduplicating",
            Stage::Analyzing => "analyzing",
            Stage::Delivering => "delivering",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("{stage} stage failed: {source:#}")]
    StageFailure {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn stage(stage: Stage, source: anyhow::Error) -> Self {
        PipelineError::StageFailure { stage, source }
    }

    /// The stage that failed, if the error is tied to one.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            PipelineError::StageFailure { stage, .. } => Some(*stage),
            PipelineError::MissingCredentials(_) => None,
        }
    }
}
