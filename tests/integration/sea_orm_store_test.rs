//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! Sea-ORM 商品存储测试（SQLite）

use crate::common::product;
use oxstock::config::DatabaseConfig;
use oxstock::store::{ProductStore, SeaOrmProductStore, StockDeduction};
use oxstock::FlashSaleError;
use secrecy::SecretString;
use std::sync::Arc;

#[path = "../common/mod.rs"]
mod common;

async fn memory_store(batch_size: usize) -> SeaOrmProductStore {
    let config = DatabaseConfig {
        batch_size,
        ..DatabaseConfig::default()
    };
    SeaOrmProductStore::connect(&config)
        .await
        .expect("Failed to open in-memory SQLite store")
}

#[tokio::test]
async fn test_bulk_create_and_list_in_stock() {
    let store = memory_store(2).await;
    store
        .bulk_create(&[
            product(3, 1),
            product(1, 10),
            product(2, 0),
            product(5, 7),
            product(4, 2),
        ])
        .await
        .unwrap();

    let listed = store.list_in_stock().await.unwrap();
    let ids: Vec<u64> = listed.iter().map(|p| p.product_id).collect();
    assert_eq!(ids, vec![1, 3, 4, 5]);

    let first = &listed[0];
    assert!(first.id > 0);
    assert_eq!(first.owner_id, 1);
    assert_eq!(first.remaining_stock, 10);
    assert_eq!(first.title, "秒杀商品 1");
    assert_eq!(first.buyer_id, None);
    assert_eq!(first.buyer_name, None);
}

#[tokio::test]
async fn test_empty_bulk_create_is_noop() {
    let store = memory_store(100).await;
    store.bulk_create(&[]).await.unwrap();
    assert!(store.list_in_stock().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_conditional_decrement_stops_at_zero() {
    let store = memory_store(100).await;
    store.bulk_create(&[product(1, 2)]).await.unwrap();

    assert_eq!(
        store.conditional_decrement(1, 1).await.unwrap(),
        StockDeduction::Applied
    );
    assert_eq!(
        store.conditional_decrement(1, 2).await.unwrap(),
        StockDeduction::InsufficientStock
    );
    assert_eq!(
        store.conditional_decrement(1, 1).await.unwrap(),
        StockDeduction::Applied
    );
    assert_eq!(
        store.conditional_decrement(1, 1).await.unwrap(),
        StockDeduction::InsufficientStock
    );
    assert_eq!(
        store.conditional_decrement(42, 1).await.unwrap(),
        StockDeduction::InsufficientStock
    );
    assert!(store.list_in_stock().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decrements_never_oversell() {
    let store = Arc::new(memory_store(100).await);
    store.bulk_create(&[product(9, 5)]).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.conditional_decrement(9, 1).await.unwrap()
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap() == StockDeduction::Applied {
            applied += 1;
        }
    }
    assert_eq!(applied, 5);
    assert!(store.list_in_stock().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_apply_reservation_applies_each_message_once() {
    let store = memory_store(100).await;
    store.bulk_create(&[product(1, 4)]).await.unwrap();

    assert_eq!(
        store.apply_reservation("msg-a", 1, 1).await.unwrap(),
        StockDeduction::Applied
    );
    assert_eq!(
        store.apply_reservation("msg-a", 1, 1).await.unwrap(),
        StockDeduction::AlreadyApplied
    );
    assert_eq!(
        store.apply_reservation("msg-b", 1, 1).await.unwrap(),
        StockDeduction::Applied
    );
    assert_eq!(store.list_in_stock().await.unwrap()[0].remaining_stock, 2);

    // 库存不足时不写回执，补货后同一消息仍可生效
    assert_eq!(
        store.apply_reservation("msg-c", 1, 5).await.unwrap(),
        StockDeduction::InsufficientStock
    );
    assert_eq!(
        store.apply_reservation("msg-c", 1, 2).await.unwrap(),
        StockDeduction::Applied
    );
    assert!(store.list_in_stock().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_values_outside_column_range_are_rejected() {
    let store = memory_store(100).await;
    let result = store.bulk_create(&[product(u64::MAX, 1)]).await;
    assert!(matches!(result, Err(FlashSaleError::OutOfRange(_))));

    let result = store.conditional_decrement(u64::MAX, 1).await;
    assert!(matches!(result, Err(FlashSaleError::OutOfRange(_))));

    store.bulk_create(&[product(1, 1)]).await.unwrap();
    let result = store.apply_reservation("msg", 1, u32::MAX).await;
    assert!(matches!(result, Err(FlashSaleError::OutOfRange(_))));
    assert_eq!(store.list_in_stock().await.unwrap()[0].remaining_stock, 1);
}

#[tokio::test]
async fn test_duplicate_product_rolls_back_whole_batch() {
    let store = memory_store(1).await;
    store.bulk_create(&[product(1, 1)]).await.unwrap();

    let result = store.bulk_create(&[product(2, 1), product(1, 1)]).await;
    assert!(result.is_err());

    let ids: Vec<u64> = store
        .list_in_stock()
        .await
        .unwrap()
        .iter()
        .map(|p| p.product_id)
        .collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn test_file_database_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flash_sale.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let config = DatabaseConfig {
        url: SecretString::new(url.into()),
        max_connections: 2,
        ..DatabaseConfig::default()
    };

    {
        let store = SeaOrmProductStore::connect(&config).await.unwrap();
        store.bulk_create(&[product(1, 3)]).await.unwrap();
        store.conditional_decrement(1, 1).await.unwrap();
    }

    let reopened = SeaOrmProductStore::connect(&config).await.unwrap();
    let listed = reopened.list_in_stock().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].remaining_stock, 2);
}
