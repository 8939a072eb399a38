use thiserror::Error;

/// Expected failure kinds crossing the core boundary.
///
/// Every variant is a condition the surrounding portal must be able to
/// render or react to; none of them abort. Entries held in the cache store
/// keep a clone of the error that put them into `Error` status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("transient transport failure: {message}")]
    Transient { message: String },
    #[error("resource not found: {message}")]
    NotFound { message: String },
    #[error("request rejected: {message}")]
    Rejected {
        message: String,
        kind: Option<String>,
    },
    #[error("malformed payload: {message}")]
    Decode { message: String },
    #[error("core invariant violated: {message}")]
    Invariant { message: String },
}

impl ResourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>, kind: Option<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            kind,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Machine-readable discriminant, stable across releases.
    ///
    /// `Rejected` carries an optional server-supplied refinement which
    /// takes precedence over the generic tag.
    pub fn kind_str(&self) -> &str {
        match self {
            Self::Transient { .. } => "transient",
            Self::NotFound { .. } => "not_found",
            Self::Rejected { kind, .. } => kind.as_deref().unwrap_or("rejected"),
            Self::Decode { .. } => "decode",
            Self::Invariant { .. } => "invariant",
        }
    }

    /// Whether the query executor may retry this failure automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
