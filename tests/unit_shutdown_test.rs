use feedgate::core::FeedgateError;
use feedgate::core::shutdown::ShutdownWaiter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_register_and_complete() {
    let waiter = ShutdownWaiter::new();
    let token = CancellationToken::new();
    waiter.processing_starting(1, &token).unwrap();
    waiter.processing_completed(1);
    assert!(waiter.shutdown(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_new_work_rejected_after_shutdown() {
    let waiter = ShutdownWaiter::new();
    assert!(waiter.shutdown(Duration::from_millis(10)).await);

    let token = CancellationToken::new();
    let err = waiter.processing_starting(1, &token).unwrap_err();
    assert!(matches!(err, FeedgateError::ShutDown));
}

#[tokio::test]
async fn test_shutdown_cancels_registered_workers() {
    let waiter = Arc::new(ShutdownWaiter::new());
    let token = CancellationToken::new();
    waiter.processing_starting(1, &token).unwrap();

    let worker = {
        let waiter = waiter.clone();
        let token = token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            waiter.processing_completed(1);
        })
    };

    assert!(waiter.shutdown(Duration::from_secs(1)).await);
    assert!(token.is_cancelled());
    worker.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_times_out_on_stuck_worker() {
    let waiter = ShutdownWaiter::new();
    let token = CancellationToken::new();
    waiter.processing_starting(1, &token).unwrap();
    // Nobody ever completes worker 1.
    assert!(!waiter.shutdown(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let waiter = ShutdownWaiter::new();
    assert!(waiter.shutdown(Duration::from_millis(10)).await);
    assert!(waiter.shutdown(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_completed_unknown_worker_is_harmless() {
    let waiter = ShutdownWaiter::new();
    waiter.processing_completed(99);
}
