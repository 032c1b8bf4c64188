// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channel behavior seen from coroutines: rendezvous between concurrent
//! send and receive runs, close while waiting, and select over three
//! channels where only the winner is touched.

use weft_rt::config::ignore_failure;
use weft_rt::{
    apply, launch_with, receive, select, send, string_channel, ChannelId, Coroutine,
    CoroutineError, RuntimeConfig,
};

/// Expected failures are part of these tests; keep them out of the log.
fn quiet() -> RuntimeConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    RuntimeConfig::default().with_exception_handler(ignore_failure)
}

fn test_channel() -> ChannelId<String> {
    string_channel("TestChannel")
}

fn sender() -> Coroutine<String, String> {
    Coroutine::first(apply(|s: String| s + "test"))
        .then(send(&test_channel()))
        .named("Send")
}

fn receiver() -> Coroutine<(), String> {
    Coroutine::first(receive(&test_channel()))
        .named("Receive")
        .then(apply(|s: String| s.to_uppercase()))
}

fn select_abc() -> Coroutine<(), String> {
    Coroutine::first(select([
        receive(&string_channel("A")),
        receive(&string_channel("B")),
        receive(&string_channel("C")),
    ]))
}

#[test]
fn send_and_receive_pairs() {
    let receive_lower = receiver().then(apply(|s: String| s.to_lowercase()));

    launch_with(quiet(), |scope| {
        let r1 = scope.spawn(&receiver(), ())?;
        let r2 = scope.spawn(&receive_lower, ())?;
        let s1 = scope.spawn(&sender(), "123".to_string())?;
        let s2 = scope.spawn(&sender(), "456".to_string())?;

        assert_eq!(s1.result()?, "123test");
        assert_eq!(s2.result()?, "456test");

        let r1v = r1.result()?;
        let r2v = r2.result()?;
        // Which receiver gets which value depends on scheduling.
        assert!(r1v == "123TEST" || r1v == "456TEST", "r1 got {r1v}");
        assert!(r2v == "123test" || r2v == "456test", "r2 got {r2v}");
        assert_ne!(r1v.to_lowercase(), r2v);

        for run in [&r1, &r2, &s1, &s2] {
            assert!(run.is_finished());
        }
        assert_eq!(s1.name(), Some("Send"));
        assert_eq!(r1.name(), Some("Receive"));
        Ok(())
    })
    .unwrap();
}

#[test]
fn close_wakes_suspended_receive() {
    launch_with(quiet(), |scope| {
        let r = scope.spawn(&receiver(), ())?;
        r.channel(&test_channel()).close();
        match r.wait() {
            Err(CoroutineError::ChannelClosed { channel }) => assert_eq!(channel, "TestChannel"),
            other => panic!("expected ChannelClosed, got {other:?}"),
        }
        r.error_handled();
        Ok(())
    })
    .unwrap();
}

#[test]
fn send_on_closed_channel_fails() {
    launch_with(quiet(), |scope| {
        scope.channel(&test_channel()).close();
        let s = scope.spawn(&sender(), "TEST".to_string())?;
        assert!(s.wait().unwrap_err().is_channel_closed());
        s.error_handled();
        Ok(())
    })
    .unwrap();
}

#[test]
fn close_twice_is_harmless() {
    launch_with(quiet(), |scope| {
        let ch = scope.channel(&test_channel());
        ch.close();
        ch.close();
        assert!(ch.is_closed());
        Ok(())
    })
    .unwrap();
}

#[test]
fn unhandled_close_aborts_scope() {
    let err = launch_with(quiet(), |scope| {
        let r = scope.spawn(&receiver(), ())?;
        scope.channel(&test_channel()).close();
        let _ = r.wait();
        Ok(())
    })
    .unwrap_err();
    match err {
        CoroutineError::ScopeAborted { failed, first } => {
            assert_eq!(failed, 1);
            assert!(first.is_channel_closed());
        }
        other => panic!("expected ScopeAborted, got {other:?}"),
    }
}

#[test]
fn select_takes_only_the_ready_channel() {
    for name in ["A", "B", "C"] {
        let winner = string_channel(name);
        launch_with(quiet(), |scope| {
            let c = scope.spawn(&select_abc(), ())?;
            let channel = scope.context().channel(&winner);
            channel.send_blocking(format!("TEST-{name}"))?;

            assert_eq!(c.result()?, format!("TEST-{name}"));
            assert!(c.is_finished());

            // The losing channels work as if the select never ran.
            for other in ["A", "B", "C"].into_iter().filter(|n| *n != name) {
                let ch = scope.channel(&string_channel(other));
                assert!(ch.is_empty());
                ch.send_blocking(format!("later-{other}"))?;
                assert_eq!(ch.receive_blocking()?, format!("later-{other}"));
            }
            Ok(())
        })
        .unwrap();
    }
}
