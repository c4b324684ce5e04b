use thiserror::Error;

/// Errors returned by avatarscan operations.
#[derive(Debug, Error)]
pub enum AvatarError {
    /// The document is not a readable PDF or Word container.
    #[error("unrecognized or unreadable document: {0}")]
    FormatError(String),

    /// An embedded image has no usable pixel data.
    #[error("failed to decode embedded image: {0}")]
    DecodeError(String),

    /// No face detector could be loaded, or it failed.
    #[error("face classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// Reading the document from disk failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AvatarError {
    pub(crate) fn format(context: &str, err: impl std::fmt::Display) -> Self {
        AvatarError::FormatError(format!("{context}: {err}"))
    }

    pub(crate) fn decode(context: &str, err: impl std::fmt::Display) -> Self {
        AvatarError::DecodeError(format!("{context}: {err}"))
    }
}
