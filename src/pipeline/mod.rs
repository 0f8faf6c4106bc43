//! Publish and resolve pipelines
//!
//! The only orchestration in the crate. Everything else is a narrow client
//! injected here as a trait object.

pub mod publish;
pub mod resolve;
pub mod session;

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a published file is represented on the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScheme {
    /// Record carries the file name and content address directly
    Direct,
    /// Record points at an uploaded metadata document
    #[default]
    Descriptive,
}

impl fmt::Display for StorageScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageScheme::Direct => write!(f, "direct"),
            StorageScheme::Descriptive => write!(f, "descriptive"),
        }
    }
}

pub use publish::{PublishError, PublishOutcome, PublishPipeline, PublishState, StageError};
pub use resolve::{Download, FileInfo, OwnedFile, ResolveError, ResolvePipeline};
pub use session::{SessionError, UploadSession};
