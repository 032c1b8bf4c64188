// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutines: immutable step pipelines.
//!
//! A `Coroutine<I, O>` never changes after construction; `then` and `with`
//! build new values that share the existing steps. Any number of runs can
//! execute the same coroutine concurrently.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::attr::{Attributes, Key, NAME};
use crate::run::{Invoke, Steps};
use crate::step::Step;

pub struct Coroutine<I, O> {
    steps: Steps,
    attributes: Attributes,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Coroutine<I, O> {
    fn clone(&self) -> Self {
        Self {
            steps: self.steps.clone(),
            attributes: self.attributes.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> Coroutine<I, O> {
    /// A coroutine consisting of `step` alone. There is no empty
    /// coroutine.
    pub fn first(step: impl Into<Step<I, O>>) -> Self {
        let steps: Vec<Arc<dyn Invoke>> = vec![step.into().into_invoke()];
        Self {
            steps: steps.into(),
            attributes: Attributes::new(),
            _marker: PhantomData,
        }
    }

    /// A new coroutine with `step` appended. `self` is unchanged.
    pub fn then<N>(&self, step: impl Into<Step<O, N>>) -> Coroutine<I, N> {
        let mut steps = self.steps.to_vec();
        steps.push(step.into().into_invoke());
        Coroutine {
            steps: steps.into(),
            attributes: self.attributes.clone(),
            _marker: PhantomData,
        }
    }

    /// A new coroutine with attribute `key` set to `value`.
    pub fn with<T: Send + Sync + 'static>(&self, key: &Key<T>, value: T) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.set(key, value);
        Self {
            steps: self.steps.clone(),
            attributes,
            _marker: PhantomData,
        }
    }

    /// Shorthand for `with(&NAME, name)`.
    pub fn named(&self, name: impl Into<String>) -> Self {
        self.with(&NAME, name.into())
    }

    pub fn name(&self) -> Option<String> {
        self.attributes.get(&NAME)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub(crate) fn steps(&self) -> &Steps {
        &self.steps
    }
}

impl<I, O> fmt::Debug for Coroutine<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.steps.iter().map(|s| s.label()).collect();
        f.debug_struct("Coroutine")
            .field("name", &self.name())
            .field("steps", &labels)
            .finish()
    }
}
