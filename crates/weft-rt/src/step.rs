// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Steps: the units a coroutine is composed of.
//!
//! Code steps (`apply`, `try_apply`, `consume`, `supply`) always finish
//! synchronously. Control-flow steps (`call`, `condition`, `loop_while`)
//! run a sub-coroutine that resumes the caller when it ends. Channel steps
//! live in `select`.

use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::coroutine::Coroutine;
use crate::error::{CoroutineError, Result};
use crate::run::{downcast, Flow, Invoke, Run, Steps, Value};

/// One typed step from `I` to `O`.
pub struct Step<I, O> {
    invoke: Arc<dyn Invoke>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Step<I, O> {
    fn clone(&self) -> Self {
        Self {
            invoke: self.invoke.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> Step<I, O> {
    pub(crate) fn from_invoke(invoke: Arc<dyn Invoke>) -> Self {
        Self {
            invoke,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_invoke(self) -> Arc<dyn Invoke> {
        self.invoke
    }

    pub fn label(&self) -> &'static str {
        self.invoke.label()
    }
}

impl<I, O> fmt::Debug for Step<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Step").field(&self.label()).finish()
    }
}

type TransformFn = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A synchronous value transformation.
struct Transform {
    label: &'static str,
    f: TransformFn,
}

impl Invoke for Transform {
    fn invoke(&self, input: Value, _run: &Run) -> Flow {
        match (self.f)(input) {
            Ok(value) => Flow::Next(value),
            Err(err) => Flow::Failed(err),
        }
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

fn transform<I, O>(label: &'static str, f: TransformFn) -> Step<I, O> {
    Step::from_invoke(Arc::new(Transform { label, f }))
}

/// Map the input with `f`.
pub fn apply<I, O, F>(f: F) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    transform(
        "apply",
        Box::new(move |input: Value| Ok(Box::new(f(downcast::<I>(input)?)) as Value)),
    )
}

/// Map the input with a fallible `f`. An `Err` fails the run with
/// `StepFailed`.
pub fn try_apply<I, O, E, F>(f: F) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    F: Fn(I) -> std::result::Result<O, E> + Send + Sync + 'static,
{
    transform(
        "try_apply",
        Box::new(move |input: Value| {
            let output = f(downcast::<I>(input)?)
                .map_err(|e| CoroutineError::step_failed("try_apply", e))?;
            Ok(Box::new(output) as Value)
        }),
    )
}

/// Run `f` for its side effect; the step outputs `()`.
pub fn consume<I, F>(f: F) -> Step<I, ()>
where
    I: Send + 'static,
    F: Fn(I) + Send + Sync + 'static,
{
    transform(
        "consume",
        Box::new(move |input: Value| {
            f(downcast::<I>(input)?);
            Ok(Box::new(()) as Value)
        }),
    )
}

/// Ignore the input and produce `f()`.
pub fn supply<I, O, F>(f: F) -> Step<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn() -> O + Send + Sync + 'static,
{
    transform("supply", Box::new(move |_: Value| Ok(Box::new(f()) as Value)))
}

struct Call {
    steps: Steps,
}

impl Invoke for Call {
    fn invoke(&self, input: Value, run: &Run) -> Flow {
        run.child(self.steps.clone(), run.position()).enter(input);
        Flow::Suspended
    }

    fn label(&self) -> &'static str {
        "call"
    }
}

/// Run `coroutine` as a sub-coroutine; its output becomes this step's.
pub fn call<I, O>(coroutine: &Coroutine<I, O>) -> Step<I, O> {
    Step::from_invoke(Arc::new(Call {
        steps: coroutine.steps().clone(),
    }))
}

impl<I, O> From<Coroutine<I, O>> for Step<I, O> {
    fn from(coroutine: Coroutine<I, O>) -> Self {
        call(&coroutine)
    }
}

impl<I, O> From<&Coroutine<I, O>> for Step<I, O> {
    fn from(coroutine: &Coroutine<I, O>) -> Self {
        call(coroutine)
    }
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Condition<I> {
    predicate: Predicate<I>,
    if_true: Steps,
    if_false: Steps,
}

impl<I: Send + 'static> Invoke for Condition<I> {
    fn invoke(&self, input: Value, run: &Run) -> Flow {
        let value = match downcast::<I>(input) {
            Ok(v) => v,
            Err(err) => return Flow::Failed(err),
        };
        let branch = if (self.predicate)(&value) {
            &self.if_true
        } else {
            &self.if_false
        };
        run.child(branch.clone(), run.position()).enter(Box::new(value));
        Flow::Suspended
    }

    fn label(&self) -> &'static str {
        "condition"
    }
}

/// Run `if_true` or `if_false` depending on `predicate(&input)`.
pub fn condition<I, O, P>(
    predicate: P,
    if_true: &Coroutine<I, O>,
    if_false: &Coroutine<I, O>,
) -> Step<I, O>
where
    I: Send + 'static,
    P: Fn(&I) -> bool + Send + Sync + 'static,
{
    Step::from_invoke(Arc::new(Condition {
        predicate: Box::new(predicate),
        if_true: if_true.steps().clone(),
        if_false: if_false.steps().clone(),
    }))
}

struct LoopWhile<T> {
    predicate: Predicate<T>,
    body: Steps,
}

impl<T: Send + 'static> Invoke for LoopWhile<T> {
    fn invoke(&self, input: Value, run: &Run) -> Flow {
        let value = match downcast::<T>(input) {
            Ok(v) => v,
            Err(err) => return Flow::Failed(err),
        };
        if !(self.predicate)(&value) {
            return Flow::Next(Box::new(value));
        }
        // The body's result re-enters this step.
        run.child(self.body.clone(), run.position() - 1)
            .enter(Box::new(value));
        Flow::Suspended
    }

    fn label(&self) -> &'static str {
        "loop_while"
    }
}

/// Feed the value through `body` for as long as `predicate` holds. The
/// predicate is checked before every iteration, so the body may not run
/// at all.
pub fn loop_while<T, P>(predicate: P, body: &Coroutine<T, T>) -> Step<T, T>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    Step::from_invoke(Arc::new(LoopWhile {
        predicate: Box::new(predicate),
        body: body.steps().clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ignore_failure, RuntimeConfig};
    use crate::scope::launch_with;

    fn quiet() -> RuntimeConfig {
        RuntimeConfig::default().with_exception_handler(ignore_failure)
    }

    #[test]
    fn code_steps_chain() {
        let co = Coroutine::first(apply(|s: String| s.len()))
            .then(apply(|n: usize| n * 2))
            .then(consume(|n: usize| assert_eq!(n, 8)))
            .then(supply(|| "done"));
        let result = launch_with(quiet(), |scope| {
            scope.spawn(&co, "four".to_string())?.result()
        });
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn try_apply_error_fails_run() {
        let co = Coroutine::first(try_apply(|s: String| s.parse::<u32>()));
        let err = launch_with(quiet(), |scope| {
            let run = scope.spawn(&co, "x1".to_string())?;
            let err = run.result().unwrap_err();
            run.error_handled();
            Ok(err)
        })
        .unwrap();
        assert!(matches!(err, CoroutineError::StepFailed { ref step, .. } if step == "try_apply"));
    }

    #[test]
    fn call_nests_coroutines() {
        let inner = Coroutine::first(apply(|n: i32| n + 1));
        let outer = Coroutine::first(apply(|n: i32| n * 10))
            .then(&inner)
            .then(call(&inner));
        let result = launch_with(quiet(), |scope| scope.spawn(&outer, 4)?.result());
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn condition_picks_branch() {
        let even = Coroutine::first(apply(|n: u32| format!("{n} is even")));
        let odd = Coroutine::first(apply(|n: u32| format!("{n} is odd")));
        let co = Coroutine::first(condition(|n: &u32| n % 2 == 0, &even, &odd));
        let (a, b) = launch_with(quiet(), |scope| {
            let a = scope.spawn(&co, 2)?;
            let b = scope.spawn(&co, 3)?;
            Ok((a.result()?, b.result()?))
        })
        .unwrap();
        assert_eq!(a, "2 is even");
        assert_eq!(b, "3 is odd");
    }

    #[test]
    fn loop_while_iterates_without_stack_growth() {
        let body = Coroutine::first(apply(|n: u64| n + 1));
        let co = Coroutine::first(loop_while(|n: &u64| *n < 10_000, &body))
            .then(apply(|n: u64| n * 2));
        let result = launch_with(quiet(), |scope| scope.spawn(&co, 0)?.result());
        assert_eq!(result.unwrap(), 20_000);
    }

    #[test]
    fn loop_body_failure_fails_caller() {
        let body = Coroutine::first(try_apply(|n: u32| {
            if n == 3 {
                Err("three")
            } else {
                Ok(n + 1)
            }
        }));
        let co = Coroutine::first(loop_while(|_: &u32| true, &body));
        let err = launch_with(quiet(), |scope| {
            let run = scope.spawn(&co, 0)?;
            run.error_handled();
            Ok(run.wait().unwrap_err())
        })
        .unwrap();
        assert!(matches!(err, CoroutineError::StepFailed { .. }));
    }

    #[test]
    fn step_panic_becomes_failure() {
        let co = Coroutine::first(apply(|_: ()| -> u8 { panic!("bad step") }));
        let result = launch_with(quiet(), |scope| {
            scope.spawn(&co, ())?;
            Ok(())
        });
        match result {
            Err(CoroutineError::ScopeAborted { failed, first }) => {
                assert_eq!(failed, 1);
                assert!(matches!(*first, CoroutineError::Panicked { .. }));
            }
            other => panic!("expected ScopeAborted, got {other:?}"),
        }
    }
}
