// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Run engine.
//!
//! A run is an explicit state record: the shared step list, the index of
//! the next step, the scope context, and where the final value goes. It
//! executes steps back to back on one worker until a step suspends. The
//! suspending step keeps a clone of the `Run` and later hands it a value
//! through `resume`, which enqueues the remainder as a new job. Nothing
//! recurses across a suspension, so long pipelines and loops never grow
//! the stack.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::Disposition;
use crate::context::Context;
use crate::continuation::RunCore;
use crate::error::{CoroutineError, Result};
use crate::executor::Job;

/// A value crossing a step boundary.
pub(crate) type Value = Box<dyn Any + Send>;

/// What a step did with its input.
pub(crate) enum Flow {
    /// Finished synchronously; continue with this value.
    Next(Value),
    /// The step holds a clone of the run and will resume it.
    Suspended,
    Failed(CoroutineError),
}

/// Type-erased step body.
pub(crate) trait Invoke: Send + Sync {
    fn invoke(&self, input: Value, run: &Run) -> Flow;

    /// Short name used in errors and traces.
    fn label(&self) -> &'static str;
}

pub(crate) type Steps = Arc<[Arc<dyn Invoke>]>;

/// Where a run's final value or failure goes.
#[derive(Clone)]
enum Sink {
    /// A spawned run; settles its continuation.
    Root(Arc<RunCore>),
    /// A sub-coroutine; resumes the calling run.
    Parent(Box<Run>),
}

#[derive(Clone)]
pub(crate) struct Run {
    steps: Steps,
    next: usize,
    context: Context,
    sink: Sink,
}

pub(crate) fn downcast<T: 'static>(value: Value) -> Result<T> {
    value
        .downcast::<T>()
        .map(|v| *v)
        .map_err(|_| CoroutineError::type_mismatch::<T>())
}

impl Run {
    pub(crate) fn root(steps: Steps, context: Context, core: Arc<RunCore>) -> Self {
        Self {
            steps,
            next: 0,
            context,
            sink: Sink::Root(core),
        }
    }

    /// A sub-run whose result resumes this run at step `resume_at`.
    pub(crate) fn child(&self, steps: Steps, resume_at: usize) -> Run {
        let mut parent = self.clone();
        parent.next = resume_at;
        Run {
            steps,
            next: 0,
            context: self.context.clone(),
            sink: Sink::Parent(Box::new(parent)),
        }
    }

    /// Index of the step after the one currently executing.
    pub(crate) fn position(&self) -> usize {
        self.next
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }

    fn root_core(&self) -> &Arc<RunCore> {
        match &self.sink {
            Sink::Root(core) => core,
            Sink::Parent(parent) => parent.root_core(),
        }
    }

    fn name(&self) -> &str {
        self.root_core().name().map_or("<unnamed>", |n| &**n)
    }

    /// Schedule the first step with `input`.
    pub(crate) fn start(self, input: Value) {
        tracing::trace!(coroutine = self.name(), "run started");
        self.schedule(Ok(input));
    }

    /// Start a sub-run on the current thread. Its parent is suspended
    /// until the sub-run ends, so this never recurses past one level per
    /// nested call.
    pub(crate) fn enter(self, input: Value) {
        self.drive(input);
    }

    /// Continue after a suspension with the suspended step's outcome.
    pub(crate) fn resume(self, outcome: Result<Value>) {
        tracing::trace!(coroutine = self.name(), step = self.next, "run resumed");
        self.schedule(outcome);
    }

    fn schedule(self, outcome: Result<Value>) {
        let executor = self.context.executor().clone();
        let core = self.root_core().clone();
        let claimed = outcome.is_ok();
        let job: Job = Box::new(move || match outcome {
            Ok(value) => self.drive(value),
            Err(err) => self.fail(err),
        });
        if executor.execute(job).is_err() {
            // A resumed run may already own a value taken from a channel;
            // it is dropped with the job.
            tracing::warn!(
                coroutine = core.name().map_or("<unnamed>", |n| &**n),
                dropped_value = claimed,
                "executor rejected run"
            );
            core.cancel(CoroutineError::Rejected);
        }
    }

    /// Execute steps on the current thread until the run suspends, fails
    /// or completes.
    fn drive(mut self, mut value: Value) {
        while let Some(step) = self.steps.get(self.next).cloned() {
            self.next += 1;
            let flow = panic::catch_unwind(AssertUnwindSafe(|| step.invoke(value, &self)))
                .unwrap_or_else(|payload| Flow::Failed(CoroutineError::from_panic(payload)));
            match flow {
                Flow::Next(v) => value = v,
                Flow::Suspended => {
                    tracing::trace!(
                        coroutine = self.name(),
                        step = step.label(),
                        "run suspended"
                    );
                    return;
                }
                Flow::Failed(err) => return self.fail(err),
            }
        }
        self.complete(value);
    }

    fn complete(self, value: Value) {
        match self.sink {
            Sink::Root(core) => {
                tracing::trace!(
                    coroutine = core.name().map_or("<unnamed>", |n| &**n),
                    "run succeeded"
                );
                core.succeed(value);
            }
            Sink::Parent(parent) => parent.resume(Ok(value)),
        }
    }

    /// Abort the remaining steps. A root run offers the failure to the
    /// exception handler before it is marked finished.
    pub(crate) fn fail(self, err: CoroutineError) {
        match self.sink {
            Sink::Root(core) => {
                let handled =
                    match panic::catch_unwind(AssertUnwindSafe(|| self.context.report(&err))) {
                        Ok(disposition) => disposition == Disposition::Handled,
                        Err(payload) => {
                            tracing::error!(
                                coroutine = core.name().map_or("<unnamed>", |n| &**n),
                                panic = %CoroutineError::from_panic(payload),
                                "exception handler panicked"
                            );
                            false
                        }
                    };
                tracing::debug!(
                    coroutine = core.name().map_or("<unnamed>", |n| &**n),
                    error = %err,
                    handled,
                    "run failed"
                );
                core.fail(err, handled);
            }
            Sink::Parent(parent) => parent.fail(err),
        }
    }
}
