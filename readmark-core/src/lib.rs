use std::path::Path;

use once_cell::sync::Lazy;
use uuid::Uuid;

pub mod autosave;
pub mod calculator;
pub mod config;
pub mod error;
pub mod record;
pub mod restore;
pub mod session;
pub mod store;
pub mod timer;
pub mod tracker;

pub use autosave::{AutoSaveScheduler, FlushOutcome};
pub use config::{AutoSaveConfig, CaptureConfig, ReadmarkConfig, RestoreConfig};
pub use error::ProgressError;
pub use record::{ProgressRecord, ProgressUpdate};
pub use restore::{
    RestorationCoordinator, RestorationHandle, RestorationPlan, RestorationTarget, RestoreOutcome,
};
pub use session::{ReadingSession, ReadingSnapshot};
pub use store::{BlobStore, FileBlobStore, MemoryBlobStore, ProgressSink, ProgressStore};
pub use tracker::ReadingTracker;

pub type DocumentId = String;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c8a52-7d1e-5b64-9a2f-c41e6d0b8e17").expect("valid namespace UUID")
});

/// Stable id for a document file: a UUID v5 of its absolute path.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes()).to_string()
}
