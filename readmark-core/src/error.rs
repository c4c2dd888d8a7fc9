use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("durable storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode or decode progress data: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("write rejected for document {document_id}")]
    Rejected { document_id: String },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("rendering surface for chapter {chapter_index} is not ready")]
    SurfaceNotReady { chapter_index: usize },
}

impl ProgressError {
    /// Persistence failures are worth retrying; everything else is absorbed where it occurs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProgressError::Io(_) | ProgressError::Codec(_) | ProgressError::Rejected { .. }
        )
    }
}

pub type Result<T, E = ProgressError> = std::result::Result<T, E>;
