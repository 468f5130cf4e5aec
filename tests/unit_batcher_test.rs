use feedgate::core::batcher;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_take_drains_up_to_max() {
    let (tx, mut rx) = mpsc::channel(16);
    for i in 0..10 {
        tx.send(i).await.unwrap();
    }
    let mut out = Vec::new();
    let cancel = CancellationToken::new();
    let n = batcher::take(&mut rx, &mut out, 4, Duration::from_millis(100), &cancel).await;
    assert_eq!(n, 4);
    assert_eq!(out, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_take_returns_partial_on_timeout() {
    let (tx, mut rx) = mpsc::channel(16);
    tx.send(1).await.unwrap();
    tx.send(2).await.unwrap();
    let mut out = Vec::new();
    let cancel = CancellationToken::new();
    let n = batcher::take(&mut rx, &mut out, 100, Duration::from_millis(50), &cancel).await;
    assert_eq!(n, 2);
}

#[tokio::test]
async fn test_take_blocks_for_first_item() {
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let sender = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(42).await.unwrap();
    });

    let mut out = Vec::new();
    // The total timeout only limits the wait after the first item; the
    // first recv waits as long as it takes.
    let n = batcher::take(&mut rx, &mut out, 4, Duration::from_millis(1), &cancel).await;
    assert_eq!(n, 1);
    assert_eq!(out, vec![42]);
    sender.await.unwrap();
}

#[tokio::test]
async fn test_take_returns_zero_on_cancel() {
    let (_tx, mut rx) = mpsc::channel::<u32>(16);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut out = Vec::new();
    let n = batcher::take(&mut rx, &mut out, 4, Duration::from_secs(10), &cancel).await;
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_take_zero_max() {
    let (tx, mut rx) = mpsc::channel(16);
    tx.send(1).await.unwrap();
    let mut out: Vec<u32> = Vec::new();
    let cancel = CancellationToken::new();
    let n = batcher::take(&mut rx, &mut out, 0, Duration::from_millis(10), &cancel).await;
    assert_eq!(n, 0);
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_drain_to_takes_whatever_is_buffered() {
    let (tx, mut rx) = mpsc::channel(16);
    tx.send(1).await.unwrap();
    tx.send(2).await.unwrap();
    let mut out = Vec::new();
    assert_eq!(batcher::drain_to(&mut rx, &mut out), 2);
    assert_eq!(out, vec![1, 2]);
    assert_eq!(batcher::drain_to(&mut rx, &mut out), 0);
}
