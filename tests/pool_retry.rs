mod common;
use common::{descriptor, FakeConnector};

use sshpool::errors::{CommandFailure, ConnectError, RetryError};
use sshpool::services::logger::Logger;
use sshpool::ssh::{HostStatus, RemoteShell, RetryPolicy, RetryWrapper, SessionPool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn pool_with(connector: Arc<FakeConnector>) -> Arc<SessionPool> {
    Arc::new(SessionPool::new(connector, Logger::new("test")))
}

fn recording_wrapper(
    pool: Arc<SessionPool>,
) -> (RetryWrapper, Arc<Mutex<Vec<HostStatus>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let wrapper = RetryWrapper::new(pool, Logger::new("test")).with_status_hook(Arc::new(
        move |status: HostStatus, _key: &str| sink.lock().unwrap().push(status),
    ));
    (wrapper, seen)
}

#[test]
fn pool_reuses_live_session_for_same_key() {
    let connector = Arc::new(FakeConnector::docker_host());
    let pool = pool_with(connector.clone());
    let desc = descriptor("docker-01");

    let first = pool.get_or_create(&desc, false).expect("first");
    let second = pool.get_or_create(&desc, false).expect("second");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(connector.connects(), 1);
    assert!(connector
        .commands()
        .iter()
        .any(|command| command.contains("connection_test")));
}

#[test]
fn force_new_replaces_and_closes_previous_session() {
    let connector = Arc::new(FakeConnector::docker_host());
    let pool = pool_with(connector.clone());
    let desc = descriptor("docker-01");

    let first = pool.get_or_create(&desc, false).expect("first");
    let replaced = pool.get_or_create(&desc, true).expect("forced");

    assert!(!Arc::ptr_eq(&first, &replaced));
    assert!(!first.lock().unwrap().is_connected());
    assert!(replaced.lock().unwrap().is_connected());
    assert_eq!(connector.connects(), 2);
    assert_eq!(pool.len(), 1);
}

#[test]
fn dead_session_is_replaced_on_next_lookup() {
    let connector = Arc::new(FakeConnector::docker_host());
    let pool = pool_with(connector.clone());
    let desc = descriptor("docker-01");

    let first = pool.get_or_create(&desc, false).expect("first");
    first.lock().unwrap().disconnect();
    let second = pool.get_or_create(&desc, false).expect("second");

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(connector.connects(), 2);
}

#[test]
fn pool_keys_are_per_user_host_port() {
    let connector = Arc::new(FakeConnector::docker_host());
    let pool = pool_with(connector);
    pool.get_or_create(&descriptor("b-host"), false).expect("b");
    pool.get_or_create(&descriptor("a-host").with_port(2222), false)
        .expect("a");

    assert_eq!(pool.keys(), vec!["ops@a-host:2222", "ops@b-host:22"]);
    assert!(pool.remove("ops@b-host:22"));
    assert!(!pool.remove("ops@b-host:22"));
    assert_eq!(pool.close_all(), 1);
    assert!(pool.is_empty());
}

#[test]
fn retry_makes_exactly_max_retries_plus_one_attempts() {
    let connector = Arc::new(FakeConnector::docker_host());
    let (wrapper, seen) = recording_wrapper(pool_with(connector.clone()));
    let policy = RetryPolicy::new(2, Duration::from_millis(1));
    let mut attempts = Vec::new();

    let result: Result<(), RetryError> = wrapper.run(
        &descriptor("docker-01"),
        &policy,
        &CancellationToken::new(),
        |_shell, ctx| {
            attempts.push(ctx.attempt);
            Err(CommandFailure::Timeout(format!("attempt {} too slow", ctx.attempt)))
        },
    );

    assert_eq!(attempts, vec![1, 2, 3]);
    match result {
        Err(RetryError::Exhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error, "attempt 3 too slow");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    // Every retry forces a fresh session.
    assert_eq!(connector.connects(), 3);
    assert_eq!(seen.lock().unwrap().last(), Some(&HostStatus::Offline));
}

#[test]
fn authentication_failure_is_not_retried() {
    let connector = Arc::new(
        FakeConnector::docker_host()
            .failing_with(vec![ConnectError::Authentication("bad password".into())]),
    );
    let (wrapper, seen) = recording_wrapper(pool_with(connector.clone()));
    let policy = RetryPolicy::new(3, Duration::from_millis(1));
    let mut ran = false;

    let result = wrapper.run(
        &descriptor("docker-01"),
        &policy,
        &CancellationToken::new(),
        |_shell, _ctx| {
            ran = true;
            Ok(())
        },
    );

    assert!(!ran);
    assert!(matches!(
        result,
        Err(RetryError::Terminal {
            attempt: 1,
            error: ConnectError::Authentication(_)
        })
    ));
    assert_eq!(connector.connects(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![HostStatus::Offline]);
}

#[test]
fn network_failure_recovers_on_next_attempt() {
    let connector = Arc::new(
        FakeConnector::docker_host().failing_with(vec![ConnectError::Network("reset".into())]),
    );
    let (wrapper, seen) = recording_wrapper(pool_with(connector.clone()));
    let policy = RetryPolicy::new(2, Duration::from_millis(1));

    let attempt = wrapper
        .run(
            &descriptor("docker-01"),
            &policy,
            &CancellationToken::new(),
            |shell, ctx| {
                let output = shell.execute("echo 'hello'", ctx.timeout, ctx.cancel);
                assert_eq!(output.text, "hello");
                Ok(ctx.attempt)
            },
        )
        .expect("recovered");

    assert_eq!(attempt, 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![HostStatus::Degraded, HostStatus::Online]
    );
}

#[test]
fn remote_errors_end_the_run_without_retry() {
    let connector = Arc::new(FakeConnector::docker_host());
    let (wrapper, _seen) = recording_wrapper(pool_with(connector.clone()));
    let policy = RetryPolicy::new(3, Duration::from_millis(1));

    let result: Result<(), RetryError> = wrapper.run(
        &descriptor("docker-01"),
        &policy,
        &CancellationToken::new(),
        |_shell, _ctx| Err(CommandFailure::RemoteError("Error: no such container".into())),
    );

    assert!(matches!(result, Err(RetryError::Failed { attempt: 1, .. })));
    assert_eq!(connector.connects(), 1);
}

#[test]
fn cancelled_token_stops_before_first_attempt() {
    let connector = Arc::new(FakeConnector::docker_host());
    let (wrapper, _seen) = recording_wrapper(pool_with(connector.clone()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result: Result<(), RetryError> = wrapper.run(
        &descriptor("docker-01"),
        &RetryPolicy::new(3, Duration::from_millis(1)),
        &cancel,
        |_shell, _ctx| Ok(()),
    );

    assert_eq!(result, Err(RetryError::Cancelled { attempts: 0 }));
    assert_eq!(connector.connects(), 0);
}

#[test]
fn backoff_doubles_and_caps() {
    let policy = RetryPolicy::new(4, Duration::from_millis(100))
        .with_max_delay(Duration::from_millis(250));
    assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
    assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
    assert_eq!(policy.backoff_delay(3), Duration::from_millis(250));
    assert_eq!(policy.max_attempts(), 5);
}

#[test]
fn reachability_is_checked_before_the_first_attempt() {
    let connector = Arc::new(FakeConnector::docker_host());
    let checks = Arc::new(Mutex::new(0u32));
    let counter = checks.clone();
    let wrapper = RetryWrapper::new(pool_with(connector.clone()), Logger::new("test"))
        .with_reachability_check(Arc::new(move |_shell: &mut dyn RemoteShell, _cancel: &CancellationToken| {
            *counter.lock().unwrap() += 1;
            Err("service unreachable".to_string())
        }));
    let mut ran = false;

    let result = wrapper.run(
        &descriptor("docker-01"),
        &RetryPolicy::new(0, Duration::from_millis(1)),
        &CancellationToken::new(),
        |_shell, _ctx| {
            ran = true;
            Ok(42)
        },
    );

    assert!(!ran);
    assert_eq!(*checks.lock().unwrap(), 1);
    assert_eq!(
        result,
        Err(RetryError::Exhausted {
            attempts: 1,
            last_error: "service unreachable".to_string(),
        })
    );
}

#[test]
fn reachability_gates_every_attempt() {
    let connector = Arc::new(FakeConnector::docker_host());
    let checks = Arc::new(Mutex::new(0u32));
    let counter = checks.clone();
    let wrapper = RetryWrapper::new(pool_with(connector), Logger::new("test"))
        .with_reachability_check(Arc::new(move |_shell: &mut dyn RemoteShell, _cancel: &CancellationToken| {
            let mut seen = counter.lock().unwrap();
            *seen += 1;
            if *seen == 1 {
                Err("daemon restarting".to_string())
            } else {
                Ok(())
            }
        }));

    let attempt = wrapper
        .run(
            &descriptor("docker-01"),
            &RetryPolicy::new(2, Duration::from_millis(1)),
            &CancellationToken::new(),
            |_shell, ctx| Ok(ctx.attempt),
        )
        .expect("second attempt");

    assert_eq!(attempt, 2);
    assert_eq!(*checks.lock().unwrap(), 2);
}

#[test]
fn deadline_stops_retries_whose_backoff_would_overrun() {
    let connector = Arc::new(FakeConnector::docker_host());
    let (wrapper, seen) = recording_wrapper(pool_with(connector.clone()));
    let policy = RetryPolicy::new(5, Duration::from_millis(200))
        .with_deadline_in(Duration::from_millis(50));
    let mut attempts = 0;

    let result: Result<(), RetryError> = wrapper.run(
        &descriptor("docker-01"),
        &policy,
        &CancellationToken::new(),
        |_shell, _ctx| {
            attempts += 1;
            Err(CommandFailure::Timeout("slow".into()))
        },
    );

    assert_eq!(attempts, 1);
    assert_eq!(
        result,
        Err(RetryError::Exhausted {
            attempts: 1,
            last_error: "slow".to_string(),
        })
    );
    assert_eq!(connector.connects(), 1);
    assert_eq!(seen.lock().unwrap().last(), Some(&HostStatus::Offline));
}

#[test]
fn changed_session_settings_replace_the_cached_session() {
    let connector = Arc::new(FakeConnector::docker_host());
    let pool = pool_with(connector.clone());
    let desc = descriptor("docker-01");

    let first = pool.get_or_create(&desc, false).expect("first");

    let mut retuned = desc.clone();
    retuned.retry_count = 9;
    let same = pool.get_or_create(&retuned, false).expect("same settings");
    assert!(Arc::ptr_eq(&first, &same));

    let mut raw = desc.clone();
    raw.clean_output = false;
    let replaced = pool.get_or_create(&raw, false).expect("raw output");

    assert!(!Arc::ptr_eq(&first, &replaced));
    assert!(!first.lock().unwrap().is_connected());
    assert!(!replaced.lock().unwrap().descriptor().clean_output);
    assert_eq!(connector.connects(), 2);
    assert_eq!(pool.len(), 1);
}
