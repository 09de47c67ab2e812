//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! Redis后端与Redis消息代理测试，Redis不可用时跳过

use crate::common::{is_redis_available, redis_config, setup_logging, unique_prefix};
use oxstock::backend::RedisBackend;
use oxstock::cache::{CacheKeys, DecrementOutcome, StockCache};
use oxstock::model::CacheRecord;
use oxstock::relay::{MessageBroker, QueueTopology, RedisBroker};
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

async fn backend(base: &str) -> Option<RedisBackend> {
    if !is_redis_available().await {
        println!("Skipping {}: Redis not available", base);
        return None;
    }
    setup_logging();
    Some(
        RedisBackend::new(&redis_config(), CacheKeys::new(unique_prefix(base)))
            .await
            .expect("Failed to connect to Redis"),
    )
}

fn record(product_id: u64, stock: i64) -> CacheRecord {
    CacheRecord {
        stock,
        price: 1299.99,
        product_id,
        title: "限量 款式: A/B \"quoted\"".to_string(),
        owner_id: 88,
    }
}

#[tokio::test]
async fn test_populate_product_round_trips_every_field() {
    let Some(backend) = backend("round_trip").await else {
        return;
    };
    let written = record(11, 42);
    backend
        .populate_product(&written, Duration::from_secs(60))
        .await
        .unwrap();

    let read = backend.record(11).await.unwrap().unwrap();
    assert_eq!(read, written);
    assert!(backend.record(12).await.unwrap().is_none());
    backend.retire_product(11).await.unwrap();
}

#[tokio::test]
async fn test_populate_batch_sets_membership() {
    let Some(backend) = backend("batch").await else {
        return;
    };
    let records = vec![record(1, 5), record(2, 6), record(3, 7)];
    backend
        .populate(&records, Duration::from_secs(60))
        .await
        .unwrap();

    let members = backend.membership().await.unwrap();
    assert_eq!(members.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(backend.is_member(2).await.unwrap());
    assert!(!backend.is_member(4).await.unwrap());

    let read = backend.records(&[3, 1, 99]).await.unwrap();
    assert_eq!(read, vec![record(3, 7), record(1, 5)]);

    backend.add_to_membership(&[1, 4]).await.unwrap();
    assert_eq!(backend.membership().await.unwrap().len(), 4);
    for id in 1..=4 {
        backend.retire_product(id).await.unwrap();
    }
}

#[tokio::test]
async fn test_populate_if_cold_only_writes_empty_catalogue() {
    let Some(backend) = backend("if_cold").await else {
        return;
    };
    assert!(backend
        .populate_if_cold(&[record(1, 5), record(2, 2)], Duration::from_secs(60))
        .await
        .unwrap());
    assert_eq!(backend.record(2).await.unwrap().unwrap(), record(2, 2));
    backend.decrement_stock(1, 1).await.unwrap();

    assert!(!backend
        .populate_if_cold(&[record(1, 5), record(3, 9)], Duration::from_secs(60))
        .await
        .unwrap());
    assert_eq!(backend.record(1).await.unwrap().unwrap().stock, 4);
    assert!(backend.record(3).await.unwrap().is_none());
    assert_eq!(
        backend.membership().await.unwrap().into_iter().collect::<Vec<_>>(),
        vec![1, 2]
    );
    for id in 1..=2 {
        backend.retire_product(id).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_scripted_decrement_is_atomic() {
    let Some(backend) = backend("decrement").await else {
        return;
    };
    let backend = Arc::new(backend);
    backend
        .populate(&[record(1, 10)], Duration::from_secs(60))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..15 {
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            backend.decrement_stock(1, 1).await.unwrap()
        }));
    }
    let mut reserved = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            DecrementOutcome::Remaining(_) => reserved += 1,
            DecrementOutcome::Insufficient => rejected += 1,
        }
    }
    assert_eq!(reserved, 10);
    assert_eq!(rejected, 5);
    assert_eq!(backend.record(1).await.unwrap().unwrap().stock, 0);

    assert!(backend.restore_stock(1, 1).await.unwrap());
    assert!(!backend.restore_stock(404, 1).await.unwrap());
    assert_eq!(
        backend.decrement_stock(404, 1).await.unwrap(),
        DecrementOutcome::Insufficient
    );
    backend.retire_product(1).await.unwrap();
}

#[tokio::test]
async fn test_redis_broker_ack_requeue_and_recover() {
    let Some(backend) = backend("broker").await else {
        return;
    };
    let broker = RedisBroker::connect(
        backend.raw_client(),
        backend.manager(),
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    let prefix = unique_prefix("relay");
    let topology = QueueTopology {
        exchange: format!("{}:skill", prefix),
        queue: format!("{}:stock_deduct_queue", prefix),
        routing_key: "skill.product".to_string(),
    };
    let queue = topology.queue.as_str();

    assert!(broker
        .publish(&topology.exchange, &topology.routing_key, b"1")
        .await
        .is_err());
    broker.declare(&topology).await.unwrap();
    broker.declare(&topology).await.unwrap();

    for body in [b"1", b"2"] {
        broker
            .publish(&topology.exchange, &topology.routing_key, body)
            .await
            .unwrap();
    }

    let first = broker
        .next_delivery(queue, Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.payload(), b"1");
    broker.nack(&first, true).await.unwrap();

    let again = broker
        .next_delivery(queue, Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.payload(), b"1");
    assert!(again.redelivered());
    broker.ack(&again).await.unwrap();

    let second = broker
        .next_delivery(queue, Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.payload(), b"2");
    assert_eq!(broker.unacked_len(queue).await.unwrap(), 1);
    assert_eq!(broker.recover(queue).await.unwrap(), 1);
    assert_eq!(broker.unacked_len(queue).await.unwrap(), 0);

    let recovered = broker
        .next_delivery(queue, Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert!(recovered.redelivered());
    broker.nack(&recovered, false).await.unwrap();

    assert!(broker
        .next_delivery(queue, Duration::from_millis(100))
        .await
        .unwrap()
        .is_none());
    assert_eq!(broker.ready_len(queue).await.unwrap(), 0);
    broker.purge(queue).await.unwrap();
}
