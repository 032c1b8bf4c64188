// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scopes under load: many runs on a small dedicated pool, selects racing
//! over the same channels in opposite orders, and runs that outlive the
//! executor.

use std::collections::HashSet;
use std::sync::Arc;

use weft_rt::config::ignore_failure;
use weft_rt::executor::{Executor, ThreadPool};
use weft_rt::{
    apply, launch_with, loop_while, receive, select, send, Capacity, ChannelId, Coroutine,
    CoroutineError, RunState, RuntimeConfig,
};

fn pool_config(workers: usize) -> RuntimeConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    RuntimeConfig::default()
        .with_executor(Arc::new(ThreadPool::new(workers)))
        .with_exception_handler(ignore_failure)
        .with_name("load")
}

#[test]
fn many_runs_on_two_workers() {
    let jobs: ChannelId<u64> = ChannelId::new("jobs");
    let producer = Coroutine::first(send(&jobs));
    let consumer: Coroutine<(), u64> =
        Coroutine::first(receive(&jobs)).then(apply(|n: u64| n * n));

    let results = launch_with(pool_config(2), |scope| {
        scope.context().create_channel(&jobs, Capacity::Bounded(0));
        let consumers = (0..200)
            .map(|_| scope.spawn(&consumer, ()))
            .collect::<Result<Vec<_>, _>>()?;
        for n in 0..200 {
            scope.spawn(&producer, n)?;
        }
        consumers.iter().map(|c| c.result()).collect::<Result<Vec<_>, _>>()
    })
    .unwrap();

    let mut results = results;
    results.sort_unstable();
    let expected: Vec<u64> = (0..200).map(|n| n * n).collect();
    assert_eq!(results, expected);
}

#[test]
fn crossing_selects_deliver_each_value_once() {
    let x: ChannelId<u32> = ChannelId::new("X");
    let y: ChannelId<u32> = ChannelId::new("Y");
    let xy: Coroutine<(), u32> = Coroutine::first(select([receive(&x), receive(&y)]));
    let yx: Coroutine<(), u32> = Coroutine::first(select([receive(&y), receive(&x)]));

    let received = launch_with(pool_config(4), |scope| {
        let mut runs = Vec::new();
        for i in 0..100 {
            runs.push(scope.spawn(if i % 2 == 0 { &xy } else { &yx }, ())?);
        }
        let (cx, cy) = (scope.channel(&x), scope.channel(&y));
        let feeder = std::thread::spawn(move || -> weft_rt::Result<()> {
            for v in 0..100 {
                if v % 3 == 0 {
                    cy.send_blocking(v)?;
                } else {
                    cx.send_blocking(v)?;
                }
            }
            Ok(())
        });
        let values = runs.iter().map(|r| r.result()).collect::<Result<Vec<_>, _>>()?;
        feeder.join().expect("feeder thread panicked")?;
        // Every value is taken by exactly one select; none is left over.
        assert!(scope.channel(&x).is_empty());
        assert!(scope.channel(&y).is_empty());
        Ok(values)
    })
    .unwrap();

    let unique: HashSet<u32> = received.iter().copied().collect();
    assert_eq!(unique.len(), 100);
}

#[test]
fn counting_loop_through_a_channel() {
    let ticks: ChannelId<u32> = ChannelId::new("ticks");
    let body = Coroutine::first(send(&ticks)).then(apply(|n: u32| n + 1));
    let counter = Coroutine::first(loop_while(|n: &u32| *n < 50, &body));

    let drained = launch_with(pool_config(2), |scope| {
        let run = scope.spawn(&counter, 0)?;
        assert_eq!(run.result()?, 50);
        let ch = scope.channel(&ticks);
        Ok(std::iter::from_fn(|| ch.try_receive().ok()).collect::<Vec<_>>())
    })
    .unwrap();
    assert_eq!(drained, (0..50).collect::<Vec<_>>());
}

#[test]
fn runs_fail_once_the_executor_stops() {
    let pool = Arc::new(ThreadPool::new(1));
    let executor: Arc<dyn Executor> = pool.clone();
    let id: ChannelId<String> = ChannelId::new("never");
    let waiting: Coroutine<(), String> = Coroutine::first(receive(&id));

    let err = launch_with(
        RuntimeConfig::default()
            .with_executor(executor)
            .with_exception_handler(ignore_failure),
        |scope| {
            let run = scope.spawn(&waiting, ())?;
            std::thread::sleep(std::time::Duration::from_millis(20));
            pool.shutdown();
            // The resumption cannot be scheduled anymore.
            scope.channel(&id).send_blocking("late".to_string())?;
            assert_eq!(run.state(), RunState::Cancelled);
            Ok(())
        },
    )
    .unwrap_err();

    match err {
        CoroutineError::ScopeAborted { first, .. } => {
            assert!(matches!(*first, CoroutineError::Rejected));
        }
        other => panic!("expected ScopeAborted, got {other:?}"),
    }
}
