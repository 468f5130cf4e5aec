use feedgate::core::FeedgateError;
use feedgate::core::watchdog::Watchdog;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_watchdog_trips_after_deadline() {
    let watchdog = Watchdog::new();
    let token = CancellationToken::new();
    watchdog.start(1, &token, Duration::from_millis(1)).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(token.is_cancelled());
    // Completion still succeeds after the trip.
    watchdog.complete(1).unwrap();
}

#[tokio::test]
async fn test_no_spurious_trip_after_complete() {
    let watchdog = Watchdog::new();
    let token = CancellationToken::new();
    watchdog
        .start(1, &token, Duration::from_millis(50))
        .unwrap();
    watchdog.complete(1).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!token.is_cancelled());
}

#[tokio::test]
async fn test_double_start_is_invalid() {
    let watchdog = Watchdog::new();
    let token = CancellationToken::new();
    watchdog.start(1, &token, Duration::from_secs(5)).unwrap();
    let err = watchdog
        .start(1, &token, Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, FeedgateError::InvalidState(_)));
    watchdog.complete(1).unwrap();
}

#[tokio::test]
async fn test_complete_without_start_is_invalid() {
    let watchdog = Watchdog::new();
    let err = watchdog.complete(7).unwrap_err();
    assert!(matches!(err, FeedgateError::InvalidState(_)));
}

#[tokio::test]
async fn test_start_complete_pairing_releases_registration() {
    let watchdog = Watchdog::new();
    let token = CancellationToken::new();
    watchdog.start(1, &token, Duration::from_secs(5)).unwrap();
    assert_eq!(watchdog.armed_count(), 1);
    watchdog.complete(1).unwrap();
    assert_eq!(watchdog.armed_count(), 0);
    // The pair may run again for the same worker.
    watchdog.start(1, &token, Duration::from_secs(5)).unwrap();
    watchdog.complete(1).unwrap();
}

#[tokio::test]
async fn test_restart_swaps_deadline() {
    let watchdog = Watchdog::new();
    let token = CancellationToken::new();
    watchdog
        .start(1, &token, Duration::from_millis(20))
        .unwrap();
    // Move to a much longer deadline before the first one fires.
    watchdog
        .restart(1, &token, Duration::from_secs(30))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!token.is_cancelled());
    watchdog.complete(1).unwrap();
}

#[tokio::test]
async fn test_independent_workers() {
    let watchdog = Watchdog::new();
    let fast = CancellationToken::new();
    let slow = CancellationToken::new();
    watchdog.start(1, &fast, Duration::from_millis(1)).unwrap();
    watchdog.start(2, &slow, Duration::from_secs(30)).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fast.is_cancelled());
    assert!(!slow.is_cancelled());
    watchdog.complete(1).unwrap();
    watchdog.complete(2).unwrap();
}
