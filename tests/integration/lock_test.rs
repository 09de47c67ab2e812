//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 分布式锁所有权测试，内存实现始终运行，Redis实现在可用时运行

use crate::common::{is_redis_available, redis_config, unique_prefix};
use oxstock::backend::{MemoryLock, RedisBackend};
use oxstock::cache::CacheKeys;
use oxstock::lock::{DistributedLock, LockToken};
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

async fn assert_ownership(lock: &dyn DistributedLock, key: &str) {
    let owner = LockToken::generate();
    let stranger = LockToken::generate();

    assert!(lock
        .try_acquire(key, &owner, Duration::from_secs(5))
        .await
        .unwrap());
    assert!(!lock
        .try_acquire(key, &stranger, Duration::from_secs(5))
        .await
        .unwrap());
    assert!(!lock.release(key, &stranger).await.unwrap());
    assert!(lock.release(key, &owner).await.unwrap());
    // 已释放后再次释放无效
    assert!(!lock.release(key, &owner).await.unwrap());
    assert!(lock
        .try_acquire(key, &stranger, Duration::from_secs(5))
        .await
        .unwrap());
    assert!(lock.release(key, &stranger).await.unwrap());
}

async fn assert_stale_owner_cannot_release(lock: &dyn DistributedLock, key: &str) {
    let stale = LockToken::generate();
    let current = LockToken::generate();

    assert!(lock
        .try_acquire(key, &stale, Duration::from_millis(50))
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(lock
        .try_acquire(key, &current, Duration::from_secs(5))
        .await
        .unwrap());

    assert!(!lock.release(key, &stale).await.unwrap());
    assert!(lock.release(key, &current).await.unwrap());
}

#[tokio::test]
async fn test_memory_lock_ownership() {
    let lock = MemoryLock::new();
    assert_ownership(&lock, "lock:skill:product:list").await;
    assert_stale_owner_cannot_release(&lock, "lock:skill:product:list").await;
}

#[tokio::test]
async fn test_memory_lock_single_winner() {
    let lock = Arc::new(MemoryLock::new());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let lock = lock.clone();
        handles.push(tokio::spawn(async move {
            lock.try_acquire("contended", &LockToken::generate(), Duration::from_secs(5))
                .await
                .unwrap()
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_redis_lock_ownership() {
    if !is_redis_available().await {
        println!("Skipping test_redis_lock_ownership: Redis not available");
        return;
    }
    let backend = RedisBackend::new(&redis_config(), CacheKeys::default())
        .await
        .unwrap();
    let key = format!("{}:lock", unique_prefix("lock"));
    assert_ownership(&backend, &key).await;
    assert_stale_owner_cannot_release(&backend, &key).await;
}
