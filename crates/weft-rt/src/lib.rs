// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Weft runtime library.
//!
//! Coroutines are immutable pipelines of steps. A scope spawns runs of
//! them onto a worker pool; a run occupies a worker only while it executes
//! steps that finish synchronously and detaches whenever a channel
//! operation has to wait. Runs talk through typed channels owned by the
//! scope, and `select` races several channel operations with exactly one
//! winner.
//!
//! Components:
//! - coroutine/step: pipeline composition, code and control-flow steps
//! - run: trampoline engine driving one run step by step
//! - channel: FIFO channels with parked senders and receivers
//! - select: channel steps, multi-way select with commit and withdraw
//! - scope/context: structured concurrency, per-scope channels and attributes
//! - continuation: observable handle of one run
//! - executor: worker pool the runs execute on
//! - attr/config: typed attributes, per-scope configuration

pub mod attr;
pub mod channel;
pub mod config;
pub mod context;
pub mod continuation;
pub mod coroutine;
pub mod error;
pub mod executor;
mod run;
pub mod scope;
pub mod select;
pub mod step;
mod sync;

pub use attr::{Attributes, Key, NAME};
pub use channel::{string_channel, Capacity, Channel, ChannelId, TryReceiveError, TrySendError};
pub use config::{Disposition, RuntimeConfig};
pub use context::Context;
pub use continuation::{Continuation, RunState};
pub use coroutine::Coroutine;
pub use error::{CoroutineError, Result};
pub use scope::{launch, launch_with, Scope};
pub use select::{receive, select, send, ChannelOp};
pub use step::{apply, call, condition, consume, loop_while, supply, try_apply, Step};
