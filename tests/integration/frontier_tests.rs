//! Concurrency tests for the frontier
//!
//! Many workers hammering one frontier must never claim the same URL twice,
//! and discovery must stay idempotent under contention.

use dredge::frontier::Frontier;
use dredge::state::EntryState;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn filled(n: usize) -> Arc<Frontier> {
    let frontier = Arc::new(Frontier::new());
    for i in 0..n {
        frontier
            .enqueue(&format!("https://shop.example.com/item/{}", i))
            .unwrap();
    }
    frontier
}

#[test]
fn test_concurrent_next_never_yields_duplicates() {
    let frontier = filled(1000);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let frontier = Arc::clone(&frontier);
            thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(url) = frontier.next() {
                    claimed.push(url);
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 1000);
    assert_eq!(unique.len(), 1000);
    assert_eq!(frontier.counts().in_flight, 1000);
    assert_eq!(frontier.counts().pending, 0);
}

#[test]
fn test_concurrent_enqueue_is_idempotent() {
    let frontier = Arc::new(Frontier::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let frontier = Arc::clone(&frontier);
            thread::spawn(move || {
                (0..200)
                    .filter(|i| {
                        frontier
                            .enqueue(&format!("https://shop.example.com/item/{}#reviews", i))
                            .unwrap()
                    })
                    .count()
            })
        })
        .collect();

    let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(created, 200);
    assert_eq!(frontier.len(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiting_worker_picks_up_requeued_url() {
    let frontier = filled(1);
    let url = frontier.next().unwrap();

    // nothing pending but one entry in flight: the waiter must block
    let waiter = {
        let frontier = Arc::clone(&frontier);
        tokio::spawn(async move { frontier.next_ready().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    frontier.requeue(&url, "HTTP 503 Service Unavailable").unwrap();

    let claimed = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed, Some(url.clone()));
    assert_eq!(frontier.attempts(&url), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_released_when_last_entry_finishes() {
    let frontier = filled(1);
    let url = frontier.next().unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let frontier = Arc::clone(&frontier);
            tokio::spawn(async move { frontier.next_ready().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    frontier.mark_done(&url).unwrap();

    for waiter in waiters {
        let next = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, None);
    }
    assert_eq!(frontier.state_of(&url), Some(EntryState::Done));
    assert!(frontier.is_exhausted());
}
