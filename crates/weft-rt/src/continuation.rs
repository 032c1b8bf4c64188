// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Continuation: the observable handle of one coroutine run.
//!
//! The engine settles a shared `RunCore` exactly once; handles block on
//! its condvar. A settled run never changes state again.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::channel::{Channel, ChannelId};
use crate::context::Context;
use crate::error::{CoroutineError, Result};
use crate::sync::{lock, wait, wait_timeout};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    /// Ended without running to completion or failing in a step, e.g.
    /// because the executor stopped accepting work.
    Cancelled,
}

pub(crate) enum Outcome {
    Running,
    Succeeded(Box<dyn Any + Send>),
    Failed(CoroutineError),
    Cancelled(CoroutineError),
}

impl Outcome {
    fn state(&self) -> RunState {
        match self {
            Outcome::Running => RunState::Running,
            Outcome::Succeeded(_) => RunState::Succeeded,
            Outcome::Failed(_) => RunState::Failed,
            Outcome::Cancelled(_) => RunState::Cancelled,
        }
    }

    fn error(&self) -> Option<&CoroutineError> {
        match self {
            Outcome::Failed(err) | Outcome::Cancelled(err) => Some(err),
            _ => None,
        }
    }
}

/// State shared between the engine and every handle of one run.
pub(crate) struct RunCore {
    outcome: Mutex<Outcome>,
    settled: Condvar,
    /// Failure acknowledged by the handler or `error_handled`.
    handled: AtomicBool,
    name: Option<Arc<str>>,
}

impl RunCore {
    pub(crate) fn new(name: Option<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Outcome::Running),
            settled: Condvar::new(),
            handled: AtomicBool::new(false),
            name,
        })
    }

    pub(crate) fn name(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    pub(crate) fn succeed(&self, value: Box<dyn Any + Send>) {
        self.settle(Outcome::Succeeded(value));
    }

    pub(crate) fn fail(&self, err: CoroutineError, handled: bool) {
        if handled {
            self.handled.store(true, Ordering::Release);
        }
        self.settle(Outcome::Failed(err));
    }

    pub(crate) fn cancel(&self, err: CoroutineError) {
        self.settle(Outcome::Cancelled(err));
    }

    /// First settlement wins; later ones are ignored.
    fn settle(&self, outcome: Outcome) {
        let mut current = lock(&self.outcome);
        if matches!(*current, Outcome::Running) {
            *current = outcome;
            drop(current);
            self.settled.notify_all();
        }
    }

    pub(crate) fn state(&self) -> RunState {
        lock(&self.outcome).state()
    }

    /// Block until settled.
    pub(crate) fn wait(&self) -> MutexGuard<'_, Outcome> {
        let mut outcome = lock(&self.outcome);
        while matches!(*outcome, Outcome::Running) {
            outcome = wait(&self.settled, outcome);
        }
        outcome
    }

    /// Block until settled or `timeout` passes.
    pub(crate) fn wait_for(&self, timeout: Duration) -> Option<MutexGuard<'_, Outcome>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = lock(&self.outcome);
        while matches!(*outcome, Outcome::Running) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            outcome = wait_timeout(&self.settled, outcome, remaining).0;
        }
        Some(outcome)
    }

    pub(crate) fn acknowledge(&self) {
        self.handled.store(true, Ordering::Release);
    }

    /// The failure the owning scope still has to raise, if any.
    pub(crate) fn unacknowledged(&self) -> Option<CoroutineError> {
        if self.handled.load(Ordering::Acquire) {
            return None;
        }
        lock(&self.outcome).error().cloned()
    }
}

/// Handle to one coroutine run started with `Scope::spawn`.
pub struct Continuation<O> {
    core: Arc<RunCore>,
    context: Context,
    _marker: PhantomData<fn() -> O>,
}

impl<O> Clone for Continuation<O> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            context: self.context.clone(),
            _marker: PhantomData,
        }
    }
}

impl<O> Continuation<O> {
    pub(crate) fn new(core: Arc<RunCore>, context: Context) -> Self {
        Self {
            core,
            context,
            _marker: PhantomData,
        }
    }

    /// Block until the run ends. Re-raises its failure.
    pub fn wait(&self) -> Result<()> {
        match self.core.wait().error() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state() != RunState::Running
    }

    pub fn state(&self) -> RunState {
        self.core.state()
    }

    /// The captured failure, without waiting.
    pub fn error(&self) -> Option<CoroutineError> {
        lock(&self.core.outcome).error().cloned()
    }

    /// Acknowledge the run's failure so the scope does not raise it when
    /// it drains.
    pub fn error_handled(&self) {
        self.core.acknowledge();
    }

    /// The coroutine's NAME attribute.
    pub fn name(&self) -> Option<&str> {
        self.core.name().map(|n| &**n)
    }

    /// Resolve a channel id in the owning scope's context.
    pub fn channel<T: Send + 'static>(&self, id: &ChannelId<T>) -> Arc<Channel<T>> {
        self.context.channel(id)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl<O: Clone + 'static> Continuation<O> {
    /// Block until the run ends, then return its value or re-raise its
    /// failure. Can be called any number of times.
    pub fn result(&self) -> Result<O> {
        extract(&self.core.wait())
    }

    /// Like `result`, but give up with `Timeout` after `timeout`. The run
    /// itself keeps going.
    pub fn result_timeout(&self, timeout: Duration) -> Result<O> {
        match self.core.wait_for(timeout) {
            Some(outcome) => extract(&outcome),
            None => Err(CoroutineError::Timeout),
        }
    }
}

impl<O: 'static> Continuation<O> {
    /// Block until the run ends, then move its value out. For outputs that
    /// are not `Clone`. Once taken, every handle of the run gets
    /// `ResultTaken` from `result` and `take_result`.
    pub fn take_result(&self) -> Result<O> {
        let mut outcome = self.core.wait();
        match &mut *outcome {
            Outcome::Succeeded(value) if value.is::<O>() => {
                let value = std::mem::replace(value, Box::new(Taken));
                value
                    .downcast::<O>()
                    .map(|v| *v)
                    .map_err(|_| CoroutineError::type_mismatch::<O>())
            }
            Outcome::Succeeded(value) => Err(mismatch::<O>(&**value)),
            Outcome::Failed(err) | Outcome::Cancelled(err) => Err(err.clone()),
            Outcome::Running => Err(CoroutineError::Timeout),
        }
    }
}

/// Placeholder left in a succeeded outcome after `take_result`.
struct Taken;

fn mismatch<O>(value: &(dyn Any + Send)) -> CoroutineError {
    if value.is::<Taken>() {
        CoroutineError::ResultTaken
    } else {
        CoroutineError::type_mismatch::<O>()
    }
}

fn extract<O: Clone + 'static>(outcome: &Outcome) -> Result<O> {
    match outcome {
        Outcome::Succeeded(value) => value
            .downcast_ref::<O>()
            .cloned()
            .ok_or_else(|| mismatch::<O>(&**value)),
        Outcome::Failed(err) | Outcome::Cancelled(err) => Err(err.clone()),
        Outcome::Running => Err(CoroutineError::Timeout),
    }
}

impl<O> fmt::Debug for Continuation<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
