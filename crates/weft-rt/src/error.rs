// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime error types.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoroutineError>;

/// Shared cause of a failed step. Shared so one failure can be reported
/// to the exception handler, the continuation and the scope.
pub type StepSource = Arc<dyn StdError + Send + Sync + 'static>;

/// Everything that can end a coroutine run or a scope abnormally.
#[derive(Debug, Clone, Error)]
pub enum CoroutineError {
    /// Send, receive or select against a closed channel, or the channel
    /// was closed while the caller was waiting.
    #[error("channel `{channel}` is closed")]
    ChannelClosed { channel: String },

    /// A step's code returned an error.
    #[error("step `{step}` failed: {source}")]
    StepFailed { step: String, source: StepSource },

    /// A step's code panicked.
    #[error("step panicked: {message}")]
    Panicked { message: String },

    /// The scope drained with failures nobody acknowledged.
    #[error("{failed} coroutine run(s) failed in scope, first: {first}")]
    ScopeAborted {
        failed: usize,
        first: Box<CoroutineError>,
    },

    /// `spawn` was called on a scope that is already shutting down.
    #[error("scope is closed")]
    ScopeClosed,

    /// A bounded wait for a result ran out.
    #[error("timed out waiting for coroutine result")]
    Timeout,

    /// The executor refused to run the next part of a run. A run resumed
    /// by a channel operation loses the value it had already taken; the
    /// sending side still saw its send succeed.
    #[error("executor rejected the run")]
    Rejected,

    /// The run's value was already moved out by `take_result`.
    #[error("coroutine result was already taken")]
    ResultTaken,

    /// A value crossing a step boundary had an unexpected type.
    #[error("value type mismatch, expected `{expected}`")]
    TypeMismatch { expected: &'static str },
}

impl CoroutineError {
    pub fn channel_closed(channel: &str) -> Self {
        Self::ChannelClosed {
            channel: channel.to_string(),
        }
    }

    pub fn step_failed<E>(step: impl Into<String>, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::StepFailed {
            step: step.into(),
            source: Arc::from(error.into()),
        }
    }

    pub(crate) fn type_mismatch<T>() -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Convert a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Panicked { message }
    }

    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failed_keeps_source() {
        let err = CoroutineError::step_failed("parse", "bad digit");
        assert_eq!(err.to_string(), "step `parse` failed: bad digit");
        assert!(err.source().is_some());
    }

    #[test]
    fn panic_payloads() {
        let err = CoroutineError::from_panic(Box::new("boom"));
        assert!(matches!(err, CoroutineError::Panicked { ref message } if message == "boom"));
        let err = CoroutineError::from_panic(Box::new(String::from("bang")));
        assert!(matches!(err, CoroutineError::Panicked { ref message } if message == "bang"));
        let err = CoroutineError::from_panic(Box::new(7_u8));
        assert!(matches!(err, CoroutineError::Panicked { ref message } if message == "unknown panic"));
    }

    #[test]
    fn scope_aborted_mentions_first_failure() {
        let err = CoroutineError::ScopeAborted {
            failed: 2,
            first: Box::new(CoroutineError::channel_closed("A")),
        };
        assert_eq!(
            err.to_string(),
            "2 coroutine run(s) failed in scope, first: channel `A` is closed"
        );
        assert!(CoroutineError::channel_closed("A").is_channel_closed());
    }
}
