use thiserror::Error;

/// The result of a memoized lookup.
pub type MemoResult<T, E> = Result<T, MemoError<E>>;

/// An error returned from [`Memoizer::get`](crate::Memoizer::get).
///
/// Errors of the wrapped computation are passed through verbatim as [`MemoError::Compute`] and
/// are cached exactly like successful results: every caller of the same key observes the same
/// error, even if retrying the computation might have succeeded. Retrying is up to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoError<E> {
    /// The computation for this key failed.
    #[error("{0}")]
    Compute(E),
    /// The computation ended without producing a result.
    ///
    /// This happens when the computation panicked or the runtime it was spawned on shut down.
    /// Like any other result, this outcome is remembered for the key.
    #[error("memoized computation was cancelled")]
    Cancelled,
    /// The memoizer was closed before the request could be served.
    ///
    /// Calling `get` after [`MemoActor::close`](crate::MemoActor::close) is a programming error.
    #[error("memoizer is closed")]
    Closed,
}

impl<E> MemoError<E> {
    /// Returns the error of the wrapped computation, if this is one.
    pub fn into_compute(self) -> Option<E> {
        match self {
            MemoError::Compute(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if this error was produced by the wrapped computation.
    pub fn is_compute(&self) -> bool {
        matches!(self, MemoError::Compute(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_error_display() {
        let err = MemoError::Compute("connection refused");
        assert_eq!(err.to_string(), "connection refused");
        assert!(err.is_compute());
        assert_eq!(err.into_compute(), Some("connection refused"));

        let err = MemoError::<&str>::Closed;
        assert_eq!(err.to_string(), "memoizer is closed");
        assert_eq!(err.into_compute(), None);
    }
}
