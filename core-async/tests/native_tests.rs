//! Integration tests for the runtime facade.

use core_async::cancel::{check, run_until_cancelled, CancellationSlot, Cancelled};
use core_async::sync::{self, CancellationToken};
use core_async::{task, time};
use std::sync::Arc;

#[tokio::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    assert_eq!(handle.await.unwrap(), 42);
}

#[tokio::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(200)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_semaphore_serializes_holders() {
    let gate = Arc::new(sync::Semaphore::new(1));
    let counter = Arc::new(sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..3 {
        let gate = gate.clone();
        let counter = counter.clone();
        handles.push(task::spawn(async move {
            let _permit = gate.acquire().await.unwrap();
            counter.lock().await.push(i);
            time::sleep(time::Duration::from_millis(5)).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(counter.lock().await.len(), 3);
}

#[tokio::test]
async fn test_child_scope_follows_parent() {
    let root = CancellationToken::new();
    let slot = CancellationSlot::new();
    let scope = slot.replace(&root);

    let waiter = {
        let token = scope.token().clone();
        task::spawn(async move { run_until_cancelled(&token, std::future::pending::<()>()).await })
    };

    root.cancel();
    assert_eq!(waiter.await.unwrap(), Err(Cancelled));
    assert_eq!(check(scope.token()), Err(Cancelled));
}

#[tokio::test]
async fn test_superseded_scope_is_cancelled_before_new_work() {
    let root = CancellationToken::new();
    let slot = CancellationSlot::new();

    let first = slot.replace(&root);
    let running = {
        let token = first.token().clone();
        task::spawn(async move {
            run_until_cancelled(&token, time::sleep(time::Duration::from_secs(30))).await
        })
    };

    let second = slot.replace(&root);
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());
    assert_eq!(running.await.unwrap(), Err(Cancelled));
}
