//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 预留引擎并发集成测试

use crate::common::{memory_stack, memory_stack_with, fast_config, product};
use oxstock::{FlashSaleError, PurchaseReply, ReservationOutcome};
use std::collections::HashMap;

#[path = "../common/mod.rs"]
mod common;

async fn run_concurrent(stock: u32, attempts: usize) -> (HashMap<&'static str, usize>, i64) {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, stock)]).await.unwrap();

    let mut handles = Vec::with_capacity(attempts);
    for _ in 0..attempts {
        let service = service.clone();
        handles.push(tokio::spawn(async move { service.reserve(1).await }));
    }

    let mut counts = HashMap::new();
    for handle in handles {
        let label = match handle.await.unwrap().unwrap() {
            ReservationOutcome::Reserved { .. } => "reserved",
            ReservationOutcome::OutOfStock { .. } => "out_of_stock",
            ReservationOutcome::UnknownProduct { .. } => "unknown",
        };
        *counts.entry(label).or_insert(0) += 1;
    }
    let final_stock = stack.cache.stock(1).unwrap();
    (counts, final_stock)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_fifteen_buyers_for_ten_units() {
    let (counts, final_stock) = run_concurrent(10, 15).await;
    assert_eq!(counts.get("reserved"), Some(&10));
    assert_eq!(counts.get("out_of_stock"), Some(&5));
    assert_eq!(counts.get("unknown"), None);
    assert_eq!(final_stock, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_oversell_for_random_sizes() {
    use rand::Rng;

    for _ in 0..5 {
        let (stock, attempts) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..30u32), rng.gen_range(1..60usize))
        };
        let (counts, final_stock) = run_concurrent(stock, attempts).await;
        let expected = attempts.min(stock as usize);
        if stock == 0 {
            // 零库存的商品不会进入可售集合
            assert_eq!(counts.get("unknown").copied().unwrap_or(0), attempts);
            continue;
        }
        assert_eq!(counts.get("reserved").copied().unwrap_or(0), expected);
        assert_eq!(final_stock, stock as i64 - expected as i64);
        assert!(final_stock >= 0);
    }
}

#[tokio::test]
async fn test_each_reservation_enqueues_one_message() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(5, 3)]).await.unwrap();

    for _ in 0..4 {
        let _ = service.reserve(5).await.unwrap();
    }
    assert_eq!(stack.broker.ready_len("stock_deduct_queue"), 3);
}

#[tokio::test]
async fn test_forged_product_id_is_rejected() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 3)]).await.unwrap();

    assert_eq!(service.purchase(999_999).await, PurchaseReply::UnknownProduct);
    assert_eq!(stack.broker.published(), 0);
}

#[tokio::test]
async fn test_enqueue_failure_is_distinct_from_out_of_stock() {
    let stack = memory_stack(vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 2)]).await.unwrap();
    stack.broker.set_fail_publishes(true);

    let result = service.reserve(1).await;
    match &result {
        Err(FlashSaleError::EnqueueFailed { product_id, .. }) => assert_eq!(*product_id, 1),
        other => panic!("expected EnqueueFailed, got {:?}", other),
    }
    assert!(!result.as_ref().unwrap_err().is_retryable());
    assert_eq!(PurchaseReply::from_result(&result), PurchaseReply::TryAgainShortly);
    assert_eq!(stack.cache.stock(1), Some(1));
}

#[tokio::test]
async fn test_enqueue_failure_rollback_restores_cache() {
    let mut config = fast_config();
    config.reservation.rollback_on_enqueue_failure = true;
    let stack = memory_stack_with(config, vec![]);
    let service = stack.runtime.service();
    service.init_sale(&[product(1, 2)]).await.unwrap();
    stack.broker.set_fail_publishes(true);

    assert!(service.reserve(1).await.is_err());
    assert_eq!(stack.cache.stock(1), Some(2));

    stack.broker.set_fail_publishes(false);
    assert_eq!(service.purchase(1).await, PurchaseReply::Reserved);
}
