//! Run-level pipeline failures.
//!
//! Per-item failures inside a phase never surface here; they are absorbed at
//! the phase with a logged cause. What remains is the structural stuff: bad
//! configuration, broken prompts, a non-skippable phase failing outright,
//! and cooperative cancellation.

use thiserror::Error;

use dowse_config::ConfigError;
use dowse_prompts::PromptError;

/// The six pipeline phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Expand,
    Search,
    Relevance,
    Fetch,
    Summarize,
    Merge,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Expand => "expand",
            Phase::Search => "search",
            Phase::Relevance => "relevance",
            Phase::Fetch => "fetch",
            Phase::Summarize => "summarize",
            Phase::Merge => "merge",
        };
        f.write_str(name)
    }
}

/// A failure that ends the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// A phase the pipeline cannot continue without failed structurally.
    #[error("pipeline aborted in {phase} phase: {reason}")]
    Aborted { phase: Phase, reason: String },

    /// The run's cancellation signal fired. Partial results are discarded.
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    pub(crate) fn aborted(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Aborted {
            phase,
            reason: reason.into(),
        }
    }
}
