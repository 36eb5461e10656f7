//! Error taxonomy for the builder, the table loaders and the query engine.
//!
//! Build and initialization failures are fatal to their caller. A missing
//! subject is never an error: lookups return empty results instead.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The builder input violated a precondition (duplicate subject run,
    /// malformed triple line). Partial builds are discarded.
    #[error("build failed: {message}")]
    Build { message: String },

    /// A table or page file could not be loaded at startup.
    #[error("failed to load `{}`: {source}", file.display())]
    Initialization {
        file: PathBuf,
        #[source]
        source: Box<StoreError>,
    },

    /// One subject's compressed chunk could not be decoded.
    #[error("malformed chunk for subject `{subject}`: {reason}")]
    MalformedChunk { subject: String, reason: String },

    /// A binary table or text table did not match its layout.
    #[error("invalid table format: {0}")]
    Format(String),

    /// A byte range fell outside the page arena.
    #[error("range {offset}+{length} exceeds arena of {arena_len} bytes")]
    OutOfRange {
        offset: u64,
        length: u32,
        arena_len: u64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn build(message: impl Into<String>) -> Self {
        StoreError::Build {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        StoreError::Format(message.into())
    }

    pub(crate) fn malformed(subject: &str, reason: impl ToString) -> Self {
        StoreError::MalformedChunk {
            subject: subject.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a loader error with the file it came from.
    pub(crate) fn while_loading(self, file: impl Into<PathBuf>) -> Self {
        StoreError::Initialization {
            file: file.into(),
            source: Box::new(self),
        }
    }
}
