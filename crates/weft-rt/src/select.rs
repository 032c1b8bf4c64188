// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channel steps and select.
//!
//! `receive` and `send` build a `ChannelOp`, which is a step on its own
//! and a candidate of `select`. Every channel step, including a lone
//! receive, runs through the same two phases:
//!
//! 1. Lock every candidate channel in ascending uid order, then try each
//!    candidate in the given order. The first one that can complete
//!    (or fails because its channel is closed) decides the step.
//! 2. Otherwise park one shared `Ticket` on every candidate, release the
//!    locks and suspend. The party that later claims the ticket is the
//!    only winner; the winner's delivery withdraws the leftover waiters,
//!    and waiters already seen by other parties are skipped as stale.
//!
//! Because nothing is taken from or put into a channel without claiming
//! the ticket first, losing channels are left as if the select had never
//! looked at them.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::channel::{
    wake_all, ChannelId, ChannelLock, ChannelState, Offer, RecvWaiter, SendWaiter, StateGuard,
    Ticket, Wakeups,
};
use crate::context::Context;
use crate::error::{CoroutineError, Result};
use crate::run::{downcast, Flow, Invoke, Run, Value};
use crate::step::Step;
use crate::sync::lock;

/// Hands a parked operation's outcome back to the suspended run.
type Deliver<O> = Arc<dyn Fn(Result<O>) + Send + Sync>;

/// One channel operation of a select.
trait Candidate<I, O>: Send + Sync {
    fn resolve(&self, context: &Context) -> Arc<dyn ChannelLock>;

    /// Complete right away if the channel allows it. `None` means the
    /// operation has to wait.
    fn attempt(&self, input: &I, state: &mut dyn Any, wakeups: &mut Wakeups) -> Option<Result<O>>;

    fn park(
        &self,
        input: &I,
        state: &mut dyn Any,
        ticket: &Arc<Ticket>,
        deliver: Deliver<O>,
        wakeups: &mut Wakeups,
    );

    fn label(&self) -> &'static str;
}

fn state_of<T: Send + 'static>(state: &mut dyn Any) -> Result<&mut ChannelState<T>> {
    state
        .downcast_mut::<ChannelState<T>>()
        .ok_or_else(CoroutineError::type_mismatch::<ChannelState<T>>)
}

/// Report a failure through `deliver` as if a channel had produced it.
fn deliver_error<O: 'static>(
    err: CoroutineError,
    ticket: &Ticket,
    deliver: Deliver<O>,
    wakeups: &mut Wakeups,
) {
    if ticket.claim() {
        wakeups.push(Box::new(move || deliver(Err(err))));
    }
}

struct ReceiveFrom<T> {
    id: ChannelId<T>,
}

impl<I, T: Send + 'static> Candidate<I, T> for ReceiveFrom<T> {
    fn resolve(&self, context: &Context) -> Arc<dyn ChannelLock> {
        context.channel(&self.id)
    }

    fn attempt(&self, _input: &I, state: &mut dyn Any, wakeups: &mut Wakeups) -> Option<Result<T>> {
        match state_of::<T>(state) {
            Ok(state) => state.take(wakeups),
            Err(err) => Some(Err(err)),
        }
    }

    fn park(
        &self,
        _input: &I,
        state: &mut dyn Any,
        ticket: &Arc<Ticket>,
        deliver: Deliver<T>,
        wakeups: &mut Wakeups,
    ) {
        match state_of::<T>(state) {
            Ok(state) => state.park_receiver(RecvWaiter {
                ticket: ticket.clone(),
                deliver: Box::new(move |outcome: Result<T>| deliver(outcome)),
            }),
            Err(err) => deliver_error(err, ticket, deliver, wakeups),
        }
    }

    fn label(&self) -> &'static str {
        "receive"
    }
}

struct SendTo<T> {
    id: ChannelId<T>,
}

impl<T: Clone + Send + 'static> Candidate<T, T> for SendTo<T> {
    fn resolve(&self, context: &Context) -> Arc<dyn ChannelLock> {
        context.channel(&self.id)
    }

    fn attempt(&self, input: &T, state: &mut dyn Any, wakeups: &mut Wakeups) -> Option<Result<T>> {
        let state = match state_of::<T>(state) {
            Ok(state) => state,
            Err(err) => return Some(Err(err)),
        };
        match state.offer(input.clone(), wakeups) {
            Offer::Done => Some(Ok(input.clone())),
            Offer::Full(_) => None,
            Offer::Closed(_) => Some(Err(state.closed_error())),
        }
    }

    fn park(
        &self,
        input: &T,
        state: &mut dyn Any,
        ticket: &Arc<Ticket>,
        deliver: Deliver<T>,
        wakeups: &mut Wakeups,
    ) {
        match state_of::<T>(state) {
            Ok(state) => {
                let sent = input.clone();
                state.park_sender(SendWaiter {
                    ticket: ticket.clone(),
                    value: input.clone(),
                    deliver: Box::new(move |outcome: Result<()>| {
                        deliver(outcome.map(|()| sent))
                    }),
                });
            }
            Err(err) => deliver_error(err, ticket, deliver, wakeups),
        }
    }

    fn label(&self) -> &'static str {
        "send"
    }
}

/// A suspending channel operation from `I` to `O`. Usable directly as a
/// step, or as one candidate of `select`.
pub struct ChannelOp<I, O> {
    candidate: Arc<dyn Candidate<I, O>>,
}

impl<I, O> Clone for ChannelOp<I, O> {
    fn clone(&self) -> Self {
        Self {
            candidate: self.candidate.clone(),
        }
    }
}

impl<I, O> fmt::Debug for ChannelOp<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChannelOp")
            .field(&self.candidate.label())
            .finish()
    }
}

/// Receive the next value of channel `id`. The step input is ignored.
/// Fails with `ChannelClosed` once the channel is closed and drained.
pub fn receive<I, T: Send + 'static>(id: &ChannelId<T>) -> ChannelOp<I, T> {
    ChannelOp {
        candidate: Arc::new(ReceiveFrom { id: id.clone() }),
    }
}

/// Send the step input to channel `id` and pass it on as the output.
/// Fails with `ChannelClosed` if the channel is closed before a receiver
/// or the buffer took the value.
pub fn send<T: Clone + Send + 'static>(id: &ChannelId<T>) -> ChannelOp<T, T> {
    ChannelOp {
        candidate: Arc::new(SendTo { id: id.clone() }),
    }
}

/// Race the given operations and complete with the first one that
/// succeeds. Exactly one operation takes effect.
///
/// # Panics
///
/// Panics if `ops` is empty.
pub fn select<I, O>(ops: impl IntoIterator<Item = ChannelOp<I, O>>) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let candidates: Vec<_> = ops.into_iter().map(|op| op.candidate).collect();
    assert!(!candidates.is_empty(), "select needs at least one operation");
    Step::from_invoke(Arc::new(Select {
        candidates,
        label: "select",
    }))
}

impl<I: Send + 'static, O: Send + 'static> From<ChannelOp<I, O>> for Step<I, O> {
    fn from(op: ChannelOp<I, O>) -> Self {
        let label = op.candidate.label();
        Step::from_invoke(Arc::new(Select {
            candidates: vec![op.candidate],
            label,
        }))
    }
}

struct Select<I, O> {
    candidates: Vec<Arc<dyn Candidate<I, O>>>,
    label: &'static str,
}

impl<I: Send + 'static, O: Send + 'static> Invoke for Select<I, O> {
    fn invoke(&self, input: Value, run: &Run) -> Flow {
        let input = match downcast::<I>(input) {
            Ok(input) => input,
            Err(err) => return Flow::Failed(err),
        };
        let channels: Vec<Arc<dyn ChannelLock>> = self
            .candidates
            .iter()
            .map(|c| c.resolve(run.context()))
            .collect();

        // Two selects over the same channels always lock them in the
        // same order.
        let mut order: Vec<&Arc<dyn ChannelLock>> = channels.iter().collect();
        order.sort_by_key(|c| c.uid());
        order.dedup_by_key(|c| c.uid());
        let slots: Vec<usize> = channels
            .iter()
            .map(|c| order.partition_point(|o| o.uid() < c.uid()))
            .collect();
        let mut guards: Vec<Box<dyn StateGuard + '_>> =
            order.iter().map(|c| c.lock_state()).collect();

        let mut wakeups = Wakeups::new();
        for (candidate, &slot) in self.candidates.iter().zip(&slots) {
            if let Some(outcome) = candidate.attempt(&input, guards[slot].state(), &mut wakeups) {
                drop(guards);
                wake_all(wakeups);
                return match outcome {
                    Ok(output) => Flow::Next(Box::new(output)),
                    Err(err) => Flow::Failed(err),
                };
            }
        }

        let ticket = Ticket::new();
        if self.candidates.len() > 1 {
            for channel in &order {
                ticket.register(channel);
            }
        }
        let parked = Mutex::new(Some(run.clone()));
        let deliver: Deliver<O> = {
            let ticket = ticket.clone();
            Arc::new(move |outcome: Result<O>| {
                ticket.withdraw();
                if let Some(run) = lock(&parked).take() {
                    run.resume(outcome.map(|output| Box::new(output) as Value));
                }
            })
        };
        for (candidate, &slot) in self.candidates.iter().zip(&slots) {
            candidate.park(
                &input,
                guards[slot].state(),
                &ticket,
                deliver.clone(),
                &mut wakeups,
            );
        }
        drop(guards);
        wake_all(wakeups);
        Flow::Suspended
    }

    fn label(&self) -> &'static str {
        self.label
    }
}
