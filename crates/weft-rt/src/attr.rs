// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Typed attribute store.
//!
//! Coroutines carry attributes as diagnostics metadata; each scope's
//! `Context` carries its own set. Keys are typed, so a lookup can never
//! return a value of the wrong type. Setting a key again replaces the
//! previous value.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed attribute key. Two keys are the same key when both the name
/// and the value type match.
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

/// Human-readable name of a coroutine, used in logs.
pub const NAME: Key<String> = Key::new("name");

type Slot = (&'static str, TypeId);

/// Map of typed keys to shared values.
#[derive(Clone, Default)]
pub struct Attributes {
    values: HashMap<Slot, Arc<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Clone + 'static>(&self, key: &Key<T>) -> Option<T> {
        self.values
            .get(&(key.name, TypeId::of::<T>()))
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Value for `key`, or `default` when unset.
    pub fn get_or<T: Clone + 'static>(&self, key: &Key<T>, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, key: &Key<T>, value: T) {
        self.values
            .insert((key.name, TypeId::of::<T>()), Arc::new(value));
    }

    pub fn contains<T: 'static>(&self, key: &Key<T>) -> bool {
        self.values.contains_key(&(key.name, TypeId::of::<T>()))
    }

    pub fn remove<T: 'static>(&mut self, key: &Key<T>) -> bool {
        self.values.remove(&(key.name, TypeId::of::<T>())).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.values.keys().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_set().entries(names).finish()
    }
}
