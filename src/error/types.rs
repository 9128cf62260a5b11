use thiserror::Error;

use crate::runtime::stores::StoreError;

/// Unified result type for the stage crate.
pub type Result<T> = std::result::Result<T, StageError>;

/// Errors surfaced by the ambient layers around the stage core.
///
/// Degenerate inputs (empty snapshots, a missing pin store, a gated waiting
/// message) never produce one of these; they are absorbed where they occur.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("observer `{name}` failed: {reason}")]
    Observer { name: String, reason: String },
    #[error("stage runtime is no longer receiving events")]
    ChannelClosed,
    #[error("script line {line}: {reason}")]
    Script { line: usize, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StageError {
    pub fn observer(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Observer {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
