//! Observer handle tests.

use tokio::time::timeout;
use tokio::time::Duration;

use super::all_watcher::AllWatcher;
use crate::config::WatcherConfig;
use crate::errors::BackingError;
use crate::errors::Error;
use crate::test_utils::svc;
use crate::test_utils::MemBacking;

#[tokio::test]
async fn next_after_stop_returns_stopped() {
    let backing = MemBacking::new();
    let handle = AllWatcher::spawn(backing.clone(), WatcherConfig::default());
    backing.wait_subscribed().await;

    let mut watcher = handle.observe();
    watcher.stop().await.unwrap();

    let err = timeout(Duration::from_secs(1), watcher.next())
        .await
        .expect("timed out")
        .unwrap_err();
    assert!(err.is_stopped());

    // and no amount of new state changes that
    backing.put(svc("wordpress", false)).await;
    let err = timeout(Duration::from_secs(1), watcher.next())
        .await
        .expect("timed out")
        .unwrap_err();
    assert!(err.is_stopped());
}

#[tokio::test]
async fn stop_is_idempotent() {
    let backing = MemBacking::new();
    let handle = AllWatcher::spawn(backing.clone(), WatcherConfig::default());
    backing.wait_subscribed().await;

    let mut watcher = handle.observe();
    watcher.stop().await.unwrap();
    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn stop_reports_loop_fatal_error() {
    let backing = MemBacking::failing_load(BackingError::LoadFailed("session expired".into()));
    let handle = AllWatcher::spawn(backing, WatcherConfig::default());

    let mut watcher = handle.observe();
    // wait for the loop to die, then stop must surface its error
    let _ = timeout(Duration::from_secs(1), watcher.next()).await;
    let err = watcher.stop().await.unwrap_err();
    assert!(matches!(err, Error::Backing(BackingError::LoadFailed(_))));
}

#[tokio::test]
async fn observers_get_distinct_ids() {
    let backing = MemBacking::new();
    let handle = AllWatcher::spawn(backing, WatcherConfig::default());

    let o1 = handle.observe();
    let o2 = handle.observe();
    assert_ne!(o1.id(), o2.id());
}

#[tokio::test]
async fn next_after_handle_dropped_returns_stopped() {
    let backing = MemBacking::new();
    let handle = AllWatcher::spawn(backing.clone(), WatcherConfig::default());
    backing.wait_subscribed().await;

    let mut watcher = handle.observe();
    drop(handle);

    let err = timeout(Duration::from_secs(1), watcher.next())
        .await
        .expect("timed out")
        .unwrap_err();
    assert!(err.is_stopped());
}
