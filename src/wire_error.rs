use thiserror::Error;

/// Abbreviation of `Result<T, WireError>`.
pub type WireResult<T> = Result<T, WireError>;

/// A list specifying categories of [`WireError`](crate::WireError).
///
/// Codec failures surface as `Overflow` (window too small) or `BadValue`
/// (structurally invalid payload); everything else belongs to the reactor
/// and pool layers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WireError {
    /// Not enough bytes remain to satisfy a codec operation.
    #[error("{0}")]
    Overflow(String),

    /// Structurally invalid payload, e.g. a missing terminator or an
    /// impossible length.
    #[error("{0}")]
    BadValue(String),

    /// The remote endpoint could not be reached, or went away.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// A transport-level operation ran out of time.
    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    /// A request's own deadline passed while it was waiting.
    #[error("exceeded time limit: {0}")]
    ExceededTimeLimit(String),

    /// The pool or reactor is shutting down; no new work is accepted and
    /// outstanding callbacks are drained with this error.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// No pool exists for the addressed shard.
    #[error("shard not found: {0}")]
    ShardNotFound(String),

    /// Implementation error.
    #[error("implementation error: {0}")]
    Internal(String),

    /// The operation's callback was cancelled before it could fire.
    /// Caller-initiated; not a failure.
    #[error("callback canceled")]
    CallbackCanceled,

    /// Error occured in underlying I/O.
    #[error("I/O error")]
    Io {
        /// The causing Error.
        #[from]
        source: std::io::Error,
    },

    /// Error occured in thread synchronization: a thread panicked while
    /// holding one of our locks.
    #[error("lock poisoned by a panicking thread")]
    Poison,
}

impl WireError {
    /// The machine-matchable code of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Overflow(_) => ErrorKind::Overflow,
            Self::BadValue(_) => ErrorKind::BadValue,
            Self::HostUnreachable(_) => ErrorKind::HostUnreachable,
            Self::NetworkTimeout(_) => ErrorKind::NetworkTimeout,
            Self::ExceededTimeLimit(_) => ErrorKind::ExceededTimeLimit,
            Self::ShutdownInProgress => ErrorKind::ShutdownInProgress,
            Self::ShardNotFound(_) => ErrorKind::ShardNotFound,
            Self::Internal(_) => ErrorKind::Internal,
            Self::CallbackCanceled => ErrorKind::CallbackCanceled,
            Self::Io { .. } => ErrorKind::Io,
            Self::Poison => ErrorKind::Poison,
        }
    }

    /// Builds an error from a code and a message; counterpart of
    /// [`kind`](Self::kind) for table-driven construction.
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Overflow => Self::Overflow(message),
            ErrorKind::BadValue => Self::BadValue(message),
            ErrorKind::HostUnreachable => Self::HostUnreachable(message),
            ErrorKind::NetworkTimeout => Self::NetworkTimeout(message),
            ErrorKind::ExceededTimeLimit => Self::ExceededTimeLimit(message),
            ErrorKind::ShutdownInProgress => Self::ShutdownInProgress,
            ErrorKind::ShardNotFound => Self::ShardNotFound(message),
            ErrorKind::Internal => Self::Internal(message),
            ErrorKind::CallbackCanceled => Self::CallbackCanceled,
            ErrorKind::Io => Self::Io {
                source: std::io::Error::new(std::io::ErrorKind::Other, message),
            },
            ErrorKind::Poison => Self::Poison,
        }
    }
}

/// Plain code companion to [`WireError`], for matching and for carrying
/// an error through codecs that need `Clone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    Overflow,
    BadValue,
    HostUnreachable,
    NetworkTimeout,
    ExceededTimeLimit,
    ShutdownInProgress,
    ShardNotFound,
    Internal,
    CallbackCanceled,
    Io,
    Poison,
}

impl<G> From<std::sync::PoisonError<G>> for WireError {
    fn from(_: std::sync::PoisonError<G>) -> Self {
        Self::Poison
    }
}

// Produces a WireError::Internal with a formatted message.
macro_rules! internal_err {
    ($($arg:tt)*) => {
        $crate::WireError::Internal(format!($($arg)*))
    };
}
