//! Error taxonomy for chapter loading.
//!
//! Index failures are fatal to a reading session; content failures are local
//! to one chapter and recoverable by scrolling against the same edge again.

/// Failure surfaced by index resolution or a chapter fetch.
///
/// `Clone` because a single network result is fanned out to every caller
/// that was coalesced onto the same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("chapter list for `{document}` is unavailable: {reason}")]
    IndexUnavailable { document: String, reason: String },

    #[error("chapter {index} is unavailable: {reason}")]
    ContentUnavailable { index: usize, reason: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl LoadError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedResponse(detail.into())
    }

    /// Fold any failure into the index context of `document`.
    pub fn into_index_unavailable(self, document: &str) -> Self {
        match self {
            Self::IndexUnavailable { .. } => self,
            other => Self::IndexUnavailable {
                document: document.to_string(),
                reason: other.reason(),
            },
        }
    }

    /// Fold any failure into the content context of chapter `index`.
    pub fn into_content_unavailable(self, index: usize) -> Self {
        match self {
            Self::ContentUnavailable { .. } => self,
            other => Self::ContentUnavailable {
                index,
                reason: other.reason(),
            },
        }
    }

    /// Chapter the failure refers to, when it refers to one.
    pub fn chapter_index(&self) -> Option<usize> {
        match self {
            Self::ContentUnavailable { index, .. } => Some(*index),
            _ => None,
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::IndexUnavailable { reason, .. } | Self::ContentUnavailable { reason, .. } => {
                reason.clone()
            }
            Self::MalformedResponse(detail) => format!("malformed response: {detail}"),
        }
    }
}
