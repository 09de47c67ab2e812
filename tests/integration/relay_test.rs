//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 持久化中继集成测试：至少一次投递、毒消息和消费者生命周期

use crate::common::{memory_stack, product};
use oxstock::relay::{ConsumeOutcome, MessageBroker};
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

const QUEUE: &str = "stock_deduct_queue";

#[tokio::test]
async fn test_reservation_is_persisted_once() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 3)]).await.unwrap();

    service.reserve(1).await.unwrap();
    let consumer = stack.runtime.consumer();
    assert_eq!(
        consumer.process_one().await.unwrap(),
        Some(ConsumeOutcome::Deducted { product_id: 1 })
    );

    assert_eq!(stack.store.product(1).unwrap().remaining_stock, 2);
    assert_eq!(stack.broker.ready_len(QUEUE), 0);
    assert_eq!(stack.broker.unacked_len(QUEUE), 0);
}

#[tokio::test]
async fn test_malformed_payload_is_dropped_and_loop_continues() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 3)]).await.unwrap();
    stack.runtime.declare_topology().await.unwrap();

    stack.broker.inject_raw(QUEUE, b"not-json");
    service.reserve(1).await.unwrap();

    stack.runtime.spawn_consumer().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while stack.store.product(1).unwrap().remaining_stock != 2 {
        assert!(tokio::time::Instant::now() < deadline, "consumer did not progress");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(stack.runtime.consumer_running().await);

    stack.runtime.shutdown().await.unwrap();
    assert_eq!(stack.broker.ready_len(QUEUE), 0);
    assert_eq!(stack.broker.unacked_len(QUEUE), 0);
    assert_eq!(stack.store.decrement_calls(), 1);
}

#[tokio::test]
async fn test_crash_before_ack_redelivers_without_double_decrement() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 4)]).await.unwrap();
    service.reserve(1).await.unwrap();

    // 第一个消费者扣减成功后在确认前崩溃
    let consumer = stack.runtime.consumer();
    let delivery = stack
        .broker
        .next_delivery(QUEUE, Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        consumer.handle(&delivery).await,
        ConsumeOutcome::Deducted { product_id: 1 }
    );
    drop(delivery);
    assert_eq!(stack.broker.unacked_len(QUEUE), 1);
    assert_eq!(stack.store.product(1).unwrap().remaining_stock, 3);

    // 重启后恢复在途消息并重新处理，库存仍充足也不会再次扣减
    assert_eq!(stack.broker.recover(QUEUE).await.unwrap(), 1);
    let outcome = consumer.process_one().await.unwrap().unwrap();
    assert_eq!(outcome, ConsumeOutcome::Duplicate { product_id: 1 });

    assert_eq!(stack.store.product(1).unwrap().remaining_stock, 3);
    assert_eq!(stack.cache.stock(1), Some(3));
    assert_eq!(stack.broker.ready_len(QUEUE), 0);
    assert_eq!(stack.broker.unacked_len(QUEUE), 0);

    // 新的预留仍然正常扣减
    service.reserve(1).await.unwrap();
    assert_eq!(
        consumer.process_one().await.unwrap(),
        Some(ConsumeOutcome::Deducted { product_id: 1 })
    );
    assert_eq!(stack.store.product(1).unwrap().remaining_stock, 2);
}

#[tokio::test]
async fn test_crash_before_decrement_is_applied_after_restart() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 4)]).await.unwrap();
    service.reserve(1).await.unwrap();

    // 取出后未处理即崩溃
    let _lost = stack
        .broker
        .next_delivery(QUEUE, Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();

    stack.runtime.spawn_consumer().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while stack.store.product(1).unwrap().remaining_stock != 3 {
        assert!(tokio::time::Instant::now() < deadline, "message was not recovered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stack.runtime.shutdown().await.unwrap();
    assert_eq!(stack.store.decrement_calls(), 1);
}

#[tokio::test]
async fn test_store_outage_is_retried_until_recovery() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 2)]).await.unwrap();
    service.reserve(1).await.unwrap();
    stack.store.set_unavailable(true);

    stack.runtime.spawn_consumer().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stack.store.decrement_calls() >= 2);
    assert_eq!(stack.store.product(1).unwrap().remaining_stock, 2);

    stack.store.set_unavailable(false);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while stack.store.product(1).unwrap().remaining_stock != 1 {
        assert!(tokio::time::Instant::now() < deadline, "retry never succeeded");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stack.runtime.shutdown().await.unwrap();
    assert_eq!(stack.broker.ready_len(QUEUE), 0);
}

#[tokio::test]
async fn test_consumer_cannot_be_spawned_twice() {
    let stack = memory_stack(vec![]);
    stack.runtime.spawn_consumer().await.unwrap();
    assert!(stack.runtime.spawn_consumer().await.is_err());
    stack.runtime.shutdown().await.unwrap();
    assert!(!stack.runtime.consumer_running().await);
}
