// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channels.
//!
//! A `Channel<T>` is a FIFO queue plus two wait-lists (parked senders and
//! parked receivers), all behind one mutex. Values are delivered in send
//! order; parked parties are served in arrival order.
//!
//! Every parked party holds a `Ticket`. Whoever completes a transfer with
//! a parked party must first claim that party's ticket. A select run
//! parks the same ticket on several channels, so only the first claim
//! wins and every other registration is skipped as stale. Wake-ups run
//! after the channel lock is released.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use thiserror::Error;

use crate::error::{CoroutineError, Result};
use crate::sync::{lock, wait};

/// Identifies a channel within a context by name and element type.
/// Does not own the channel.
pub struct ChannelId<T> {
    name: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ChannelId<T> {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: 'static> ChannelId<T> {
    pub(crate) fn key(&self) -> (Arc<str>, TypeId) {
        (self.name.clone(), TypeId::of::<T>())
    }
}

/// Id of a channel carrying strings.
pub fn string_channel(name: &str) -> ChannelId<String> {
    ChannelId::new(name)
}

impl<T> Clone for ChannelId<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for ChannelId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for ChannelId<T> {}

impl<T> Hash for ChannelId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<T> fmt::Debug for ChannelId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId<{}>({})", std::any::type_name::<T>(), self.name)
    }
}

impl<T> fmt::Display for ChannelId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// How many values a channel buffers before senders park.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unbounded,
    /// At most `n` buffered values. `Bounded(0)` is a pure rendezvous.
    Bounded(usize),
}

impl Capacity {
    fn admits(self, buffered: usize) -> bool {
        match self {
            Capacity::Unbounded => true,
            Capacity::Bounded(n) => buffered < n,
        }
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::Unbounded
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid channel capacity `{0}`, expected `unbounded` or a number")]
pub struct ParseCapacityError(String);

impl FromStr for Capacity {
    type Err = ParseCapacityError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(Capacity::Unbounded);
        }
        s.parse::<usize>()
            .map(Capacity::Bounded)
            .map_err(|_| ParseCapacityError(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum TrySendError<T> {
    /// Nobody is waiting and the buffer is full.
    #[error("channel is full")]
    Full(T),
    #[error("channel is closed")]
    Closed(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryReceiveError {
    /// No value available right now.
    #[error("channel is empty")]
    Empty,
    /// Closed and drained.
    #[error("channel is closed")]
    Closed,
}

/// Claim token of one parked party. A select parks one ticket on several
/// channels; claiming it is what commits the select to one of them.
pub(crate) struct Ticket {
    claimed: AtomicBool,
    registrations: Mutex<Vec<Weak<dyn ChannelLock>>>,
}

impl Ticket {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            claimed: AtomicBool::new(false),
            registrations: Mutex::new(Vec::new()),
        })
    }

    /// Exactly one caller ever gets `true`.
    pub(crate) fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Remember a channel this ticket is parked on, for `withdraw`.
    pub(crate) fn register(&self, channel: &Arc<dyn ChannelLock>) {
        lock(&self.registrations).push(Arc::downgrade(channel));
    }

    /// Remove this ticket's leftover waiters from every registered
    /// channel. Call only after the ticket was claimed and with no
    /// channel lock held.
    pub(crate) fn withdraw(self: &Arc<Self>) {
        let registrations = std::mem::take(&mut *lock(&self.registrations));
        for channel in registrations.iter().filter_map(Weak::upgrade) {
            channel.withdraw(self);
        }
    }
}

/// Deferred wake-ups, run once the channel lock is released.
pub(crate) type Wakeups = Vec<Box<dyn FnOnce() + Send>>;

pub(crate) fn wake_all(wakeups: Wakeups) {
    for wake in wakeups {
        wake();
    }
}

pub(crate) struct RecvWaiter<T> {
    pub ticket: Arc<Ticket>,
    pub deliver: Box<dyn FnOnce(Result<T>) + Send>,
}

pub(crate) struct SendWaiter<T> {
    pub ticket: Arc<Ticket>,
    pub value: T,
    pub deliver: Box<dyn FnOnce(Result<()>) + Send>,
}

/// Outcome of offering a value to a channel.
pub(crate) enum Offer<T> {
    /// Handed to a receiver or buffered.
    Done,
    /// No room; the value comes back.
    Full(T),
    Closed(T),
}

/// Everything behind the channel mutex.
pub(crate) struct ChannelState<T> {
    name: Arc<str>,
    buffer: VecDeque<T>,
    capacity: Capacity,
    closed: bool,
    senders: VecDeque<SendWaiter<T>>,
    receivers: VecDeque<RecvWaiter<T>>,
}

impl<T: Send + 'static> ChannelState<T> {
    fn new(name: Arc<str>, capacity: Capacity) -> Self {
        Self {
            name,
            buffer: VecDeque::new(),
            capacity,
            closed: false,
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
        }
    }

    pub(crate) fn closed_error(&self) -> CoroutineError {
        CoroutineError::channel_closed(&self.name)
    }

    /// Give `value` to the first live parked receiver, else buffer it if
    /// there is room.
    pub(crate) fn offer(&mut self, value: T, wakeups: &mut Wakeups) -> Offer<T> {
        if self.closed {
            return Offer::Closed(value);
        }
        while let Some(receiver) = self.receivers.pop_front() {
            if receiver.ticket.claim() {
                let deliver = receiver.deliver;
                wakeups.push(Box::new(move || deliver(Ok(value))));
                return Offer::Done;
            }
        }
        if self.capacity.admits(self.buffer.len()) {
            self.buffer.push_back(value);
            Offer::Done
        } else {
            Offer::Full(value)
        }
    }

    /// Take the next value: buffered first, then straight from a parked
    /// sender. `Some(Err)` once closed and drained, `None` when the
    /// caller has to wait.
    pub(crate) fn take(&mut self, wakeups: &mut Wakeups) -> Option<Result<T>> {
        if let Some(value) = self.buffer.pop_front() {
            self.admit_senders(wakeups);
            return Some(Ok(value));
        }
        while let Some(sender) = self.senders.pop_front() {
            let SendWaiter {
                ticket,
                value,
                deliver,
            } = sender;
            if ticket.claim() {
                wakeups.push(Box::new(move || deliver(Ok(()))));
                return Some(Ok(value));
            }
        }
        if self.closed {
            return Some(Err(self.closed_error()));
        }
        None
    }

    /// Move parked senders' values into freed buffer space.
    fn admit_senders(&mut self, wakeups: &mut Wakeups) {
        while self.capacity.admits(self.buffer.len()) {
            let Some(sender) = self.senders.pop_front() else {
                break;
            };
            let SendWaiter {
                ticket,
                value,
                deliver,
            } = sender;
            if ticket.claim() {
                self.buffer.push_back(value);
                wakeups.push(Box::new(move || deliver(Ok(()))));
            }
        }
    }

    pub(crate) fn park_receiver(&mut self, waiter: RecvWaiter<T>) {
        self.receivers.push_back(waiter);
    }

    pub(crate) fn park_sender(&mut self, waiter: SendWaiter<T>) {
        self.senders.push_back(waiter);
    }

    /// Mark closed and fail every live parked party. Returns false if the
    /// channel was already closed.
    fn close(&mut self, wakeups: &mut Wakeups) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for receiver in self.receivers.drain(..) {
            if receiver.ticket.claim() {
                let err = CoroutineError::channel_closed(&self.name);
                let deliver = receiver.deliver;
                wakeups.push(Box::new(move || deliver(Err(err))));
            }
        }
        for sender in self.senders.drain(..) {
            if sender.ticket.claim() {
                let err = CoroutineError::channel_closed(&self.name);
                let deliver = sender.deliver;
                wakeups.push(Box::new(move || deliver(Err(err))));
            }
        }
        true
    }

    fn withdraw(&mut self, ticket: &Arc<Ticket>) {
        self.receivers.retain(|w| !Arc::ptr_eq(&w.ticket, ticket));
        self.senders.retain(|w| !Arc::ptr_eq(&w.ticket, ticket));
    }
}

/// Type-erased view of a channel, so a select can lock channels of
/// different element types in one fixed order.
pub(crate) trait ChannelLock: Send + Sync {
    /// Process-unique id; defines the lock order.
    fn uid(&self) -> u64;
    fn lock_state(&self) -> Box<dyn StateGuard + '_>;
    fn withdraw(&self, ticket: &Arc<Ticket>);
}

/// A held channel lock. `state` is the `ChannelState<T>` behind it.
pub(crate) trait StateGuard {
    fn state(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> StateGuard for MutexGuard<'_, ChannelState<T>> {
    fn state(&mut self) -> &mut dyn Any {
        &mut **self
    }
}

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// A typed channel owned by one context.
pub struct Channel<T> {
    id: ChannelId<T>,
    uid: u64,
    state: Mutex<ChannelState<T>>,
}

impl<T: Send + 'static> Channel<T> {
    pub(crate) fn new(id: ChannelId<T>, capacity: Capacity) -> Self {
        let state = ChannelState::new(id.name.clone(), capacity);
        Self {
            id,
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> &ChannelId<T> {
        &self.id
    }

    pub fn capacity(&self) -> Capacity {
        lock(&self.state).capacity
    }

    /// Buffered values not yet received.
    pub fn len(&self) -> usize {
        lock(&self.state).buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).buffer.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Close the channel. Every parked sender and receiver fails with
    /// `ChannelClosed`; buffered values stay receivable. Closing twice is
    /// a no-op.
    pub fn close(&self) {
        let mut wakeups = Wakeups::new();
        let first = lock(&self.state).close(&mut wakeups);
        if first {
            tracing::debug!(channel = %self.id, woken = wakeups.len(), "channel closed");
        }
        wake_all(wakeups);
    }

    /// Send without waiting.
    pub fn try_send(&self, value: T) -> std::result::Result<(), TrySendError<T>> {
        let mut wakeups = Wakeups::new();
        let offer = lock(&self.state).offer(value, &mut wakeups);
        wake_all(wakeups);
        match offer {
            Offer::Done => Ok(()),
            Offer::Full(v) => Err(TrySendError::Full(v)),
            Offer::Closed(v) => Err(TrySendError::Closed(v)),
        }
    }

    /// Receive without waiting.
    pub fn try_receive(&self) -> std::result::Result<T, TryReceiveError> {
        let mut wakeups = Wakeups::new();
        let taken = lock(&self.state).take(&mut wakeups);
        wake_all(wakeups);
        match taken {
            Some(Ok(v)) => Ok(v),
            Some(Err(_)) => Err(TryReceiveError::Closed),
            None => Err(TryReceiveError::Empty),
        }
    }

    /// Send from a plain thread, blocking it until the value is buffered
    /// or taken by a receiver. Inside a coroutine use the `send` step
    /// instead, which suspends the run rather than the worker thread.
    pub fn send_blocking(&self, value: T) -> Result<()> {
        let mut wakeups = Wakeups::new();
        let parked = {
            let mut state = lock(&self.state);
            match state.offer(value, &mut wakeups) {
                Offer::Done => None,
                Offer::Closed(_) => return Err(state.closed_error()),
                Offer::Full(value) => {
                    let handoff = Handoff::new();
                    let slot = handoff.clone();
                    state.park_sender(SendWaiter {
                        ticket: Ticket::new(),
                        value,
                        deliver: Box::new(move |r| slot.fill(r)),
                    });
                    Some(handoff)
                }
            }
        };
        wake_all(wakeups);
        match parked {
            None => Ok(()),
            Some(handoff) => handoff.wait(),
        }
    }

    /// Receive from a plain thread, blocking it until a value arrives or
    /// the channel is closed and drained.
    pub fn receive_blocking(&self) -> Result<T> {
        let mut wakeups = Wakeups::new();
        let outcome = {
            let mut state = lock(&self.state);
            match state.take(&mut wakeups) {
                Some(result) => Ok(result),
                None => {
                    let handoff = Handoff::new();
                    let slot = handoff.clone();
                    state.park_receiver(RecvWaiter {
                        ticket: Ticket::new(),
                        deliver: Box::new(move |r| slot.fill(r)),
                    });
                    Err(handoff)
                }
            }
        };
        wake_all(wakeups);
        match outcome {
            Ok(result) => result,
            Err(handoff) => handoff.wait(),
        }
    }
}

impl<T: Send + 'static> ChannelLock for Channel<T> {
    fn uid(&self) -> u64 {
        self.uid
    }

    fn lock_state(&self) -> Box<dyn StateGuard + '_> {
        Box::new(lock(&self.state))
    }

    fn withdraw(&self, ticket: &Arc<Ticket>) {
        lock(&self.state).withdraw(ticket);
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("uid", &self.uid)
            .finish_non_exhaustive()
    }
}

/// One-shot slot a blocked thread waits on.
struct Handoff<R> {
    slot: Mutex<Option<R>>,
    filled: Condvar,
}

impl<R> Handoff<R> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            filled: Condvar::new(),
        })
    }

    fn fill(&self, value: R) {
        *lock(&self.slot) = Some(value);
        self.filled.notify_all();
    }

    fn wait(&self) -> R {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            slot = wait(&self.filled, slot);
        }
    }
}
