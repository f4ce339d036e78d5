//! Acknowledgement types — exactly one response flows back per message.

use std::collections::HashMap;

/// Why a single dispatch failed.
///
/// Clonable so the same error can ride a channel and land in a log line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The connection-level request failed.
    #[error("request failed: {0}")]
    Transport(String),
    /// The endpoint answered outside the 2xx range.
    #[error("endpoint returned status {0}")]
    Status(u16),
    /// The output shut down before the message was delivered.
    #[error("output closed before delivery")]
    OutputClosed,
}

/// The outcome of dispatching exactly one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Total outcome: delivered, or one error describing a total failure.
    Simple(Result<(), DispatchError>),
    /// Individual failures keyed by downstream output index, used when a
    /// broker saw some (or all) of its outputs fail.
    Mapped(HashMap<usize, DispatchError>),
}

impl Response {
    pub fn success() -> Self {
        Response::Simple(Ok(()))
    }

    pub fn failure(err: DispatchError) -> Self {
        Response::Simple(Err(err))
    }

    pub fn mapped(errors: HashMap<usize, DispatchError>) -> Self {
        Response::Mapped(errors)
    }

    /// The error carried by this response, if any. For mapped responses the
    /// lowest-indexed failure is reported; a mapped response with no entries
    /// has no individual error to name but still reads as a failure.
    pub fn error(&self) -> Option<&DispatchError> {
        match self {
            Response::Simple(Ok(())) => None,
            Response::Simple(Err(e)) => Some(e),
            Response::Mapped(errors) => errors
                .iter()
                .min_by_key(|(index, _)| **index)
                .map(|(_, e)| e),
        }
    }

    /// A mapped response is only ever synthesised for total failure, so it
    /// is never a success regardless of how many entries it carries.
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Simple(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_success_has_no_error() {
        let res = Response::success();
        assert!(res.is_success());
        assert_eq!(res.error(), None);
    }

    #[test]
    fn simple_failure_reports_its_error() {
        let res = Response::failure(DispatchError::Status(503));
        assert!(!res.is_success());
        assert_eq!(res.error(), Some(&DispatchError::Status(503)));
    }

    #[test]
    fn mapped_reports_lowest_index() {
        let mut errors = HashMap::new();
        errors.insert(2, DispatchError::Status(500));
        errors.insert(1, DispatchError::OutputClosed);
        let res = Response::mapped(errors);
        assert_eq!(res.error(), Some(&DispatchError::OutputClosed));
    }

    #[test]
    fn mapped_is_never_success() {
        // Even without entries to name, a mapped response means total
        // failure.
        assert!(!Response::mapped(HashMap::new()).is_success());

        let mut errors = HashMap::new();
        errors.insert(0, DispatchError::Status(500));
        assert!(!Response::mapped(errors).is_success());
    }
}
