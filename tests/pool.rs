//! Execution context pool behavior against the scripted backend.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{pool, pool_config, ScriptedBackend};
use webacquire::error::{ErrorKind, PoolError};
use webacquire::pool::{ContextState, PoolConfig, ReleaseOutcome};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(start_paused = true)]
async fn launches_lazily_and_reuses_idle_contexts() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(2));
    assert_eq!(pool.live_contexts(), 0);
    assert_eq!(backend.launched(), 0);

    let lease = pool.acquire(WAIT).await.unwrap();
    let first = lease.id().clone();
    assert_eq!(lease.handle().state(), ContextState::Busy);
    lease.release(ReleaseOutcome::Healthy).await;

    let lease = pool.acquire(WAIT).await.unwrap();
    assert_eq!(lease.id(), &first);
    assert_eq!(backend.launched(), 1);

    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.busy, 1);
    assert_eq!(stats.idle, 0);
    lease.release(ReleaseOutcome::Healthy).await;
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn live_contexts_never_exceed_capacity() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(2));
    let peak = Arc::new(Mutex::new(0usize));

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let pool = pool.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            let lease = pool.acquire(WAIT).await.unwrap();
            {
                let mut peak = peak.lock().unwrap();
                *peak = (*peak).max(pool.live_contexts());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            lease.release(ReleaseOutcome::Healthy).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(*peak.lock().unwrap() <= 2);
    assert_eq!(backend.launched(), 2);
    assert_eq!(pool.live_contexts(), 2);
}

#[tokio::test(start_paused = true)]
async fn acquire_times_out_when_exhausted() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(1));
    let held = pool.acquire(WAIT).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = pool.acquire(Duration::from_millis(500)).await.unwrap_err();
    assert!(matches!(err, PoolError::AcquireTimeout(_)));
    assert_eq!(err.kind(), ErrorKind::LaunchTimeout);
    assert!(started.elapsed() >= Duration::from_millis(500));

    held.release(ReleaseOutcome::Healthy).await;
    assert!(pool.acquire(WAIT).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn waiters_are_served_in_arrival_order() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(1));
    let held = pool.acquire(WAIT).await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for name in ["first", "second", "third"] {
        let pool = pool.clone();
        let order = order.clone();
        tasks.push(tokio::spawn(async move {
            let lease = pool.acquire(WAIT).await.unwrap();
            order.lock().unwrap().push(name);
            tokio::time::sleep(Duration::from_millis(10)).await;
            lease.release(ReleaseOutcome::Healthy).await;
        }));
        // Let the waiter enqueue before the next one arrives.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    held.release(ReleaseOutcome::Healthy).await;
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn evicts_after_consecutive_failures() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(1));

    let mut original = None;
    for expected in 0..3u32 {
        let lease = pool.acquire(WAIT).await.unwrap();
        let id = lease.id().clone();
        assert_eq!(*original.get_or_insert_with(|| id.clone()), id);
        assert_eq!(lease.handle().consecutive_failures(), expected);
        lease.release(ReleaseOutcome::Failed).await;
    }

    // The third failure evicted the context; this waits for the replacement.
    let lease = pool.acquire(WAIT).await.unwrap();
    let original = original.unwrap();
    assert_ne!(lease.id(), &original);
    assert_eq!(lease.handle().consecutive_failures(), 0);
    assert!(backend.closed().contains(&original));
    assert_eq!(backend.launched(), 2);
    assert_eq!(pool.stats().evicted, 1);
    assert!(pool.live_contexts() <= 1);
    lease.release(ReleaseOutcome::Healthy).await;
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_failure_count() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(1));

    for outcome in [
        ReleaseOutcome::Failed,
        ReleaseOutcome::Failed,
        ReleaseOutcome::Healthy,
        ReleaseOutcome::Failed,
        ReleaseOutcome::Failed,
    ] {
        let lease = pool.acquire(WAIT).await.unwrap();
        lease.release(outcome).await;
    }

    let lease = pool.acquire(WAIT).await.unwrap();
    assert_eq!(lease.handle().consecutive_failures(), 2);
    assert_eq!(backend.launched(), 1);
    assert_eq!(pool.stats().evicted, 0);
}

#[tokio::test(start_paused = true)]
async fn threshold_is_configurable() {
    let backend = ScriptedBackend::new();
    let pool = pool(
        &backend,
        PoolConfig {
            max_contexts: 1,
            failure_threshold: 1,
            ..PoolConfig::default()
        },
    );

    let lease = pool.acquire(WAIT).await.unwrap();
    let first = lease.id().clone();
    lease.release(ReleaseOutcome::Failed).await;

    let lease = pool.acquire(WAIT).await.unwrap();
    assert_ne!(lease.id(), &first);
}

#[tokio::test(start_paused = true)]
async fn failed_launch_frees_capacity() {
    let backend = ScriptedBackend::new();
    backend.fail_launches(1);
    let pool = pool(&backend, pool_config(1));

    let err = pool.acquire(WAIT).await.unwrap_err();
    assert!(matches!(err, PoolError::Launch(_)));
    assert_eq!(err.kind(), ErrorKind::LaunchTimeout);
    assert_eq!(pool.stats().launch_failures, 1);
    assert_eq!(pool.live_contexts(), 0);

    assert!(pool.acquire(WAIT).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn slow_launch_times_out() {
    let backend = ScriptedBackend::new();
    backend.set_launch_delay(Duration::from_secs(120));
    let pool = pool(
        &backend,
        PoolConfig {
            max_contexts: 1,
            launch_timeout_ms: 1_000,
            ..PoolConfig::default()
        },
    );

    let err = pool.acquire(WAIT).await.unwrap_err();
    assert!(matches!(err, PoolError::LaunchTimeout(_)));
    assert_eq!(pool.live_contexts(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_lease_comes_back_as_failed() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(1));

    let lease = pool.acquire(WAIT).await.unwrap();
    let id = lease.id().clone();
    drop(lease);

    let lease = pool.acquire(WAIT).await.unwrap();
    assert_eq!(lease.id(), &id);
    assert_eq!(lease.handle().consecutive_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_busy_contexts_then_closes_everything() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(2));

    let idle = pool.acquire(WAIT).await.unwrap();
    let busy = pool.acquire(WAIT).await.unwrap();
    idle.release(ReleaseOutcome::Healthy).await;

    let returning = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        busy.release(ReleaseOutcome::Healthy).await;
    });

    pool.shutdown(Duration::from_secs(1)).await;
    returning.await.unwrap();

    assert_eq!(pool.live_contexts(), 0);
    assert_eq!(backend.live(), 0);
    assert_eq!(backend.closed().len(), 2);
    assert!(pool.stats().closed);

    let err = pool.acquire(WAIT).await.unwrap_err();
    assert!(matches!(err, PoolError::Closed));
    assert_eq!(err.kind(), ErrorKind::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn shutdown_terminates_contexts_that_miss_the_drain() {
    let backend = ScriptedBackend::new();
    let pool = pool(&backend, pool_config(1));
    let stuck = pool.acquire(WAIT).await.unwrap();

    pool.shutdown(Duration::from_millis(500)).await;
    assert_eq!(backend.live(), 0);
    assert_eq!(pool.live_contexts(), 0);

    // A late release after termination is harmless.
    stuck.release(ReleaseOutcome::Healthy).await;
    assert_eq!(pool.live_contexts(), 0);
    assert_eq!(backend.closed().len(), 1);

    // Second shutdown is a no-op.
    pool.shutdown(Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_a_launch_in_progress() {
    let backend = ScriptedBackend::new();
    backend.set_launch_delay(Duration::from_secs(5));
    let pool = pool(&backend, pool_config(1));

    let acquiring = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Duration::from_secs(60)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.launched(), 0);
    assert_eq!(pool.live_contexts(), 1);

    pool.shutdown(Duration::from_secs(1)).await;

    // The launch finished before shutdown returned and was closed right away.
    assert_eq!(backend.launched(), 1);
    assert_eq!(backend.closed().len(), 1);
    assert_eq!(backend.live(), 0);
    assert_eq!(pool.live_contexts(), 0);

    let err = acquiring.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Closed));
}

#[tokio::test]
async fn lease_dropped_outside_a_runtime_is_evicted_at_the_threshold() {
    let backend = ScriptedBackend::new();
    let pool = pool(
        &backend,
        PoolConfig {
            failure_threshold: 1,
            ..pool_config(1)
        },
    );

    let lease = pool.acquire(WAIT).await.unwrap();
    let id = lease.id().clone();
    std::thread::spawn(move || drop(lease)).join().unwrap();

    let lease = pool.acquire(WAIT).await.unwrap();
    assert_ne!(lease.id(), &id);
    assert_eq!(lease.handle().consecutive_failures(), 0);
    assert_eq!(backend.closed(), vec![id]);
    assert_eq!(backend.launched(), 2);
    assert_eq!(pool.stats().evicted, 1);
    lease.release(ReleaseOutcome::Healthy).await;
}
