use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use accumulator_cache::test::StubRuntime;
use accumulator_cache::{
    AccumulatorSnapshotCache, CacheConfig, FetchError, JobId, RefreshError, RefreshMode,
};
use serde_json::json;
use tokio::time;

use crate::utils::{config, setup_cache};

#[tokio::test(start_paused = true)]
async fn test_poll_scenario() {
    let runtime = Arc::new(StubRuntime::found([("c1", Some(3))]));
    let cache = setup_cache(config(Duration::from_secs(5)), &runtime);

    cache.refresh_if_stale().await.unwrap();
    assert_eq!(runtime.requests(), 1);
    assert_eq!(cache.current_snapshot()["c1"], Some(json!(3)));

    time::advance(Duration::from_secs(2)).await;
    runtime.set_found([("c1", Some(7))]);
    cache.refresh_if_stale().await.unwrap();
    assert_eq!(runtime.requests(), 1);
    assert_eq!(cache.current_snapshot()["c1"], Some(json!(3)));

    time::advance(Duration::from_secs(4)).await;
    cache.refresh_if_stale().await.unwrap();
    assert_eq!(runtime.requests(), 2);
    assert_eq!(cache.current_snapshot()["c1"], Some(json!(7)));
}

#[tokio::test(start_paused = true)]
async fn test_poll_before_job_exists() {
    let runtime = Arc::new(StubRuntime::found([("c1", Some(3))]));
    let cache = AccumulatorSnapshotCache::from_config(&config(Duration::from_secs(5)));
    cache.set_local_runtime(runtime.clone());

    for _ in 0..3 {
        cache.refresh_if_stale().await.unwrap();
        time::advance(Duration::from_secs(10)).await;
    }
    assert_eq!(runtime.requests(), 0);
    assert_eq!(cache.last_refresh(), None);

    // the job only becomes known later on
    cache.set_job_id(JobId::new("J1"));
    cache.refresh_if_stale().await.unwrap();
    assert_eq!(runtime.requests(), 1);
    assert_eq!(cache.current_snapshot()["c1"], Some(json!(3)));
}

#[tokio::test(start_paused = true)]
async fn test_missing_backend_is_reported() {
    let cache = AccumulatorSnapshotCache::from_config(&config(Duration::from_secs(5)));
    cache.set_job_id(JobId::new("J1"));

    let err = cache.refresh_if_stale().await.unwrap_err();
    assert!(matches!(err, RefreshError::Configuration));
    assert_eq!(err.to_string(), "no valid upstream target configured");

    // nothing was recorded, so the next poll reports the same problem
    let err = cache.refresh_if_stale().await.unwrap_err();
    assert!(matches!(err, RefreshError::Configuration));
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_during_outage() {
    let runtime = Arc::new(StubRuntime::found([("bytesRead", Some(100))]));
    let cache = setup_cache(config(Duration::from_secs(1)), &runtime);

    cache.refresh_if_stale().await.unwrap();
    let good = cache.current_snapshot();

    runtime.set_response(Err(FetchError::Transport("job manager unreachable".into())));
    for _ in 0..5 {
        time::advance(Duration::from_secs(2)).await;
        cache.refresh_if_stale().await.unwrap();
        assert_eq!(cache.current_snapshot(), good);
    }
    assert_eq!(runtime.requests(), 6);

    runtime.set_found([("bytesRead", Some(250))]);
    time::advance(Duration::from_secs(2)).await;
    cache.refresh_if_stale().await.unwrap();
    assert_eq!(cache.current_snapshot()["bytesRead"], Some(json!(250)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_complete_snapshots() {
    let runtime = Arc::new(StubRuntime::found([("a", Some(1)), ("b", Some(1)), ("c", Some(1))]));
    let cache = setup_cache(
        CacheConfig {
            refresh_mode: RefreshMode::SingleFlight,
            ..config(Duration::ZERO)
        },
        &runtime,
    );
    cache.refresh(true).await.unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let cache = cache.clone();
            let done = done.clone();
            tokio::spawn(async move {
                while !done.load(Ordering::Acquire) {
                    let snapshot = cache.current_snapshot();
                    assert_eq!(snapshot.len(), 3);
                    assert_eq!(snapshot["a"], snapshot["b"]);
                    assert_eq!(snapshot["b"], snapshot["c"]);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for round in 2..200 {
        runtime.set_found([("a", Some(round)), ("b", Some(round)), ("c", Some(round))]);
        cache.refresh(true).await.unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(runtime.requests(), 199);
    assert_eq!(cache.current_snapshot()["a"], Some(json!(199)));
}
