//! What a run hands back to its caller.

use marginalia_core::error::ProviderError;
use thiserror::Error;

/// Reported when the iteration ceiling is reached before the model produced
/// any text of its own.
pub const EXHAUSTED_MESSAGE: &str = "I've reached the maximum number of tool call iterations \
without a final answer. Please provide further guidance or raise the iteration limit.";

/// The two ways a run can end without a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// The model answered with a turn that requested no tools.
    Completed {
        text: String,
        iterations: u32,
        tool_calls_made: usize,
    },

    /// Every permitted round-trip asked for tools. `partial` holds the text
    /// the model wrote along the way, or [`EXHAUSTED_MESSAGE`].
    IterationExhausted {
        partial: String,
        iterations: u32,
        tool_calls_made: usize,
    },
}

impl AgentOutcome {
    /// The answer text, or the best-effort partial answer.
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text, .. } => text,
            Self::IterationExhausted { partial, .. } => partial,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::IterationExhausted { .. })
    }

    pub fn iterations(&self) -> u32 {
        match self {
            Self::Completed { iterations, .. } | Self::IterationExhausted { iterations, .. } => {
                *iterations
            }
        }
    }

    pub fn tool_calls_made(&self) -> usize {
        match self {
            Self::Completed {
                tool_calls_made, ..
            }
            | Self::IterationExhausted {
                tool_calls_made, ..
            } => *tool_calls_made,
        }
    }
}

/// Hard failures of a run.
///
/// Tool faults and malformed tool arguments never show up here; they are
/// folded into the conversation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The caller's cancellation token fired.
    #[error("Run cancelled")]
    Cancelled,

    /// The chat-completion request failed.
    #[error("Transport error: {0}")]
    Transport(ProviderError),
}

impl AgentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ProviderError> for AgentError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_cancellation_maps_to_cancelled() {
        assert!(AgentError::from(ProviderError::Cancelled).is_cancelled());
        let err = AgentError::from(ProviderError::Network("connection reset".into()));
        assert!(matches!(err, AgentError::Transport(ProviderError::Network(_))));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn outcome_accessors() {
        let done = AgentOutcome::Completed {
            text: "4".into(),
            iterations: 2,
            tool_calls_made: 1,
        };
        assert_eq!(done.text(), "4");
        assert!(!done.is_exhausted());
        assert_eq!(done.iterations(), 2);

        let exhausted = AgentOutcome::IterationExhausted {
            partial: EXHAUSTED_MESSAGE.into(),
            iterations: 3,
            tool_calls_made: 3,
        };
        assert!(exhausted.is_exhausted());
        assert_eq!(exhausted.tool_calls_made(), 3);
    }
}
