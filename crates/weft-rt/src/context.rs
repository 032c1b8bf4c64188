// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scope context.
//!
//! One per scope. Owns the scope's channels (created lazily on first
//! reference, exactly one per id even under concurrent first use), the
//! scope's attributes, and its configuration. Runs and continuations keep
//! a clone to resolve channel ids.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::attr::{Attributes, Key};
use crate::channel::{Capacity, Channel, ChannelId};
use crate::config::{Disposition, RuntimeConfig};
use crate::error::CoroutineError;
use crate::executor::Executor;
use crate::sync::{lock, read, write};

type ChannelKey = (Arc<str>, TypeId);

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    channels: Mutex<HashMap<ChannelKey, Arc<dyn Any + Send + Sync>>>,
    attributes: RwLock<Attributes>,
    config: RuntimeConfig,
}

impl Context {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                channels: Mutex::new(HashMap::new()),
                attributes: RwLock::new(Attributes::new()),
                config,
            }),
        }
    }

    /// The channel for `id`, created with the configured default
    /// capacity if it does not exist yet.
    pub fn channel<T: Send + 'static>(&self, id: &ChannelId<T>) -> Arc<Channel<T>> {
        self.create_channel(id, self.inner.config.channel_capacity)
    }

    /// Like `channel`, but a newly created channel gets `capacity`. An
    /// existing channel is returned unchanged.
    pub fn create_channel<T: Send + 'static>(
        &self,
        id: &ChannelId<T>,
        capacity: Capacity,
    ) -> Arc<Channel<T>> {
        let key = id.key();
        let mut channels = lock(&self.inner.channels);
        if let Some(existing) = channels.get(&key) {
            if let Ok(channel) = Arc::clone(existing).downcast::<Channel<T>>() {
                return channel;
            }
        }
        let channel = Arc::new(Channel::new(id.clone(), capacity));
        channels.insert(key, channel.clone());
        tracing::trace!(channel = %id, ?capacity, "channel created");
        channel
    }

    pub fn has_channel<T: 'static>(&self, id: &ChannelId<T>) -> bool {
        lock(&self.inner.channels).contains_key(&id.key())
    }

    /// Forget the channel for `id`. Parties already holding it keep it.
    pub fn remove_channel<T: 'static>(&self, id: &ChannelId<T>) -> bool {
        lock(&self.inner.channels).remove(&id.key()).is_some()
    }

    /// Drop every channel. Called when the owning scope ends.
    pub(crate) fn clear_channels(&self) {
        lock(&self.inner.channels).clear();
    }

    pub fn get<T: Clone + 'static>(&self, key: &Key<T>, default: T) -> T {
        read(&self.inner.attributes).get_or(key, default)
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: &Key<T>, value: T) {
        write(&self.inner.attributes).set(key, value);
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.inner.config.executor
    }

    /// Offer a run failure to the configured exception handler.
    pub(crate) fn report(&self, err: &CoroutineError) -> Disposition {
        (self.inner.config.exception_handler)(err)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("channels", &lock(&self.inner.channels).len())
            .field("attributes", &*read(&self.inner.attributes))
            .field("config", &self.inner.config)
            .finish()
    }
}
