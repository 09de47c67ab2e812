//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 运行时装配与生命周期测试

use crate::common::{memory_stack, product, setup_logging};
use oxstock::config::Config;
use oxstock::metrics::{get_metrics_string, GLOBAL_METRICS};
use oxstock::store::MemoryProductStore;
use oxstock::{FlashSaleError, FlashSaleRuntime, PurchaseReply};
use secrecy::SecretString;
use serial_test::serial;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

async fn wait_for_stock(store: &MemoryProductStore, product_id: u64, expected: u32) -> bool {
    for _ in 0..100 {
        if store.product(product_id).map(|p| p.remaining_stock) == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
#[serial]
async fn test_end_to_end_sale_reaches_durable_store() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service
        .init_sale(&[product(1, 3), product(2, 1)])
        .await
        .unwrap();
    stack.runtime.spawn_consumer().await.unwrap();
    assert!(stack.runtime.consumer_running().await);

    assert_eq!(service.purchase(1).await, PurchaseReply::Reserved);
    assert_eq!(service.purchase(1).await, PurchaseReply::Reserved);
    assert_eq!(service.purchase(2).await, PurchaseReply::Reserved);
    assert_eq!(service.purchase(2).await, PurchaseReply::OutOfStock);
    assert_eq!(service.purchase(77).await, PurchaseReply::UnknownProduct);

    assert!(wait_for_stock(&stack.store, 1, 1).await);
    assert!(wait_for_stock(&stack.store, 2, 0).await);

    stack.runtime.shutdown().await.unwrap();
    assert!(!stack.runtime.consumer_running().await);
    assert_eq!(stack.broker.ready_len("stock_deduct_queue"), 0);
    assert_eq!(stack.broker.unacked_len("stock_deduct_queue"), 0);
}

#[tokio::test]
#[serial]
async fn test_declare_topology_allows_publishing_before_consumer() {
    let stack = memory_stack(vec![product(5, 2)]);
    stack.runtime.declare_topology().await.unwrap();
    stack.runtime.declare_topology().await.unwrap();

    let service = stack.runtime.service();
    let listed = service.list_products().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(service.purchase(5).await, PurchaseReply::Reserved);
    assert_eq!(stack.broker.ready_len("stock_deduct_queue"), 1);

    stack.runtime.spawn_consumer().await.unwrap();
    assert!(wait_for_stock(&stack.store, 5, 1).await);
    stack.runtime.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_reservation_outcomes_are_counted() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(9, 1)]).await.unwrap();

    let count = |result| GLOBAL_METRICS.event_count("reservation", "reserve", result);
    let before = (count("reserved"), count("out_of_stock"), count("unknown_product"));

    service.purchase(9).await;
    service.purchase(9).await;
    service.purchase(404).await;

    assert_eq!(count("reserved"), before.0 + 1);
    assert_eq!(count("out_of_stock"), before.1 + 1);
    assert_eq!(count("unknown_product"), before.2 + 1);

    let exported = get_metrics_string();
    assert!(exported.contains(
        "flash_sale_events_total{component=\"reservation\", operation=\"reserve\", result=\"reserved\"}"
    ));
}

#[tokio::test]
async fn test_consumer_cannot_start_after_shutdown() {
    let stack = memory_stack(vec![]);
    stack.runtime.shutdown().await.unwrap();
    let result = stack.runtime.spawn_consumer().await;
    assert!(matches!(result, Err(FlashSaleError::Shutdown(_))));
}

#[tokio::test]
async fn test_connect_fails_fast_on_unreachable_redis() {
    setup_logging();
    let mut config = Config::default();
    config.redis.connection_string = SecretString::new("redis://127.0.0.1:1".to_string().into());
    config.redis.connection_timeout_ms = 200;
    config.redis.command_timeout_ms = 200;

    let result = tokio::time::timeout(Duration::from_secs(10), FlashSaleRuntime::connect(config))
        .await
        .expect("connect should not hang");
    assert!(result.is_err());
}
