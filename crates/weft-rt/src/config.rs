// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-scope runtime configuration.
//!
//! Passed explicitly to `launch_with`; there is no process-wide mutable
//! configuration. `RuntimeConfig::from_env` reads the `WEFT_*` overrides.

use std::fmt;
use std::sync::Arc;

use crate::channel::Capacity;
use crate::error::CoroutineError;
use crate::executor::{self, Executor, ThreadPool};

/// What the exception handler decided about a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Leave the failure for the scope to raise when it drains.
    Propagate,
    /// The failure is acknowledged; the scope will not raise it.
    Handled,
}

/// Called once for every run that fails, before the run is marked
/// finished.
pub type ExceptionHandler = Arc<dyn Fn(&CoroutineError) -> Disposition + Send + Sync>;

/// Default handler: log at error level and propagate.
pub fn log_failure(err: &CoroutineError) -> Disposition {
    tracing::error!(error = %err, "coroutine run failed");
    Disposition::Propagate
}

/// Quiet handler: propagate without logging. For code that expects
/// failures, such as tests exercising closed channels.
pub fn ignore_failure(_err: &CoroutineError) -> Disposition {
    Disposition::Propagate
}

#[derive(Clone)]
pub struct RuntimeConfig {
    pub executor: Arc<dyn Executor>,
    pub exception_handler: ExceptionHandler,
    /// Capacity given to channels created on first use.
    pub channel_capacity: Capacity,
    /// Scope name, shown in logs.
    pub name: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executor: executor::shared(),
            exception_handler: Arc::new(log_failure),
            channel_capacity: Capacity::Unbounded,
            name: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults, overridden by `WEFT_WORKERS` (size of a dedicated pool,
    /// `0` or unset keeps the shared pool) and `WEFT_CHANNEL_CAPACITY`
    /// (`unbounded` or a number). Unparseable values are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("WEFT_WORKERS") {
            match raw.trim().parse::<usize>() {
                Ok(0) => {}
                Ok(n) => config.executor = Arc::new(ThreadPool::new(n)),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid WEFT_WORKERS"),
            }
        }

        if let Ok(raw) = std::env::var("WEFT_CHANNEL_CAPACITY") {
            match raw.parse::<Capacity>() {
                Ok(capacity) => config.channel_capacity = capacity,
                Err(err) => tracing::warn!(error = %err, "ignoring WEFT_CHANNEL_CAPACITY"),
            }
        }

        config
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CoroutineError) -> Disposition + Send + Sync + 'static,
    {
        self.exception_handler = Arc::new(handler);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: Capacity) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("channel_capacity", &self.channel_capacity)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
