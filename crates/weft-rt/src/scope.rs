// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Structured-concurrency scopes.
//!
//! `launch` opens a scope, runs the body on the calling thread and then
//! blocks until every run spawned in the scope has ended, whether the body
//! returned, failed or panicked. No run outlives its scope. The scope's
//! channels are dropped once it has drained.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, ChannelId};
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::continuation::{Continuation, RunCore};
use crate::coroutine::Coroutine;
use crate::error::{CoroutineError, Result};
use crate::run::Run;
use crate::sync::lock;

struct Runs {
    cores: Vec<Arc<RunCore>>,
    open: bool,
}

/// Handle passed to the `launch` body.
pub struct Scope {
    context: Context,
    runs: Mutex<Runs>,
}

/// Run `body` in a new scope with the default configuration.
pub fn launch<R, F>(body: F) -> Result<R>
where
    F: FnOnce(&Scope) -> Result<R>,
{
    launch_with(RuntimeConfig::default(), body)
}

/// Run `body` in a new scope configured by `config`.
///
/// Returns the body's result once all runs have ended. If the body
/// succeeded but some run failed without the failure being acknowledged
/// (by the exception handler or `Continuation::error_handled`), returns
/// `ScopeAborted` instead. A panic in the body is resumed after the runs
/// have drained.
pub fn launch_with<R, F>(config: RuntimeConfig, body: F) -> Result<R>
where
    F: FnOnce(&Scope) -> Result<R>,
{
    let span = tracing::debug_span!(
        "scope",
        name = config.name.as_deref().unwrap_or("<unnamed>")
    );
    let _entered = span.enter();

    let scope = Scope::new(config);
    tracing::debug!("scope opened");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&scope)));
    let drained = scope.close();

    match outcome {
        Err(payload) => panic::resume_unwind(payload),
        Ok(Err(err)) => {
            if let Err(aborted) = drained {
                tracing::debug!(error = %aborted, "scope failures superseded by body error");
            }
            Err(err)
        }
        Ok(Ok(value)) => drained.map(|()| value),
    }
}

impl Scope {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            context: Context::new(config),
            runs: Mutex::new(Runs {
                cores: Vec::new(),
                open: true,
            }),
        }
    }

    /// Start a run of `coroutine` with `input`. Returns immediately; the
    /// first step runs on the executor.
    pub fn spawn<I, O>(&self, coroutine: &Coroutine<I, O>, input: I) -> Result<Continuation<O>>
    where
        I: Send + 'static,
    {
        let core = RunCore::new(coroutine.name().map(Arc::from));
        {
            let mut runs = lock(&self.runs);
            if !runs.open {
                return Err(CoroutineError::ScopeClosed);
            }
            runs.cores.push(core.clone());
        }
        Run::root(coroutine.steps().clone(), self.context.clone(), core.clone())
            .start(Box::new(input));
        Ok(Continuation::new(core, self.context.clone()))
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn channel<T: Send + 'static>(&self, id: &ChannelId<T>) -> Arc<Channel<T>> {
        self.context.channel(id)
    }

    pub fn name(&self) -> Option<&str> {
        self.context.config().name.as_deref()
    }

    /// Refuse further spawns, wait for every run, then release the
    /// channels.
    fn close(&self) -> Result<()> {
        let cores = {
            let mut runs = lock(&self.runs);
            runs.open = false;
            std::mem::take(&mut runs.cores)
        };

        let mut failed = 0;
        let mut first = None;
        for core in &cores {
            drop(core.wait());
            if let Some(err) = core.unacknowledged() {
                failed += 1;
                first.get_or_insert(err);
            }
        }
        self.context.clear_channels();
        tracing::debug!(runs = cores.len(), failed, "scope closed");

        match first {
            None => Ok(()),
            Some(first) => Err(CoroutineError::ScopeAborted {
                failed,
                first: Box::new(first),
            }),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let runs = lock(&self.runs);
        f.debug_struct("Scope")
            .field("name", &self.name())
            .field("runs", &runs.cores.len())
            .field("open", &runs.open)
            .finish()
    }
}
