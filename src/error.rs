use crate::image_reference::ParseError;
use thiserror::Error;

/// Failure of a single reconciliation attempt. Every variant is retryable: the source object
/// may be edited, the registry may recover and conflicts resolve on a fresh read.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed parsing image {image:?}: {source}")]
    Parse {
        image: String,
        #[source]
        source: ParseError,
    },

    #[error("no valid backup reference for image {source_image:?}: {source}")]
    Destination {
        source_image: String,
        #[source]
        source: ParseError,
    },

    #[error("error copying image {source_image:?} to {destination:?}: {cause:#}")]
    Transfer {
        source_image: String,
        destination: String,
        cause: anyhow::Error,
    },

    #[error("object was modified since it was read")]
    Conflict,

    #[error("error accessing object: {0:#}")]
    Store(anyhow::Error),
}

impl Error {
    /// Whether the failure is worth a warning event on the workload. Conflicts and store
    /// failures are expected under concurrent edits and are only retried.
    pub fn emits_warning(&self) -> bool {
        matches!(
            self,
            Error::Parse { .. } | Error::Destination { .. } | Error::Transfer { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
