//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 进程内商品存储，用于测试和无数据库的演示环境。

use super::{ProductStore, StockDeduction};
use crate::error::{FlashSaleError, Result};
use crate::model::FlashSaleProduct;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 内存商品存储
///
/// 按 `product_id` 保存商品，并统计各操作的调用次数，便于验证回源次数。
#[derive(Debug, Default)]
pub struct MemoryProductStore {
    products: Mutex<BTreeMap<u64, FlashSaleProduct>>,
    // 已生效的消息ID
    receipts: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
    decrement_calls: AtomicUsize,
    list_delay_ms: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用给定商品初始化存储
    pub fn with_products(products: impl IntoIterator<Item = FlashSaleProduct>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.lock();
            for mut product in products {
                product.id = store.next_id.fetch_add(1, Ordering::SeqCst) as u64 + 1;
                guard.insert(product.product_id, product);
            }
        }
        store
    }

    /// `list_in_stock` 被调用的次数
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// 扣减类操作（`conditional_decrement` 与 `apply_reservation`）被调用的次数
    pub fn decrement_calls(&self) -> usize {
        self.decrement_calls.load(Ordering::SeqCst)
    }

    /// 读取商品当前状态
    pub fn product(&self, product_id: u64) -> Option<FlashSaleProduct> {
        self.lock().get(&product_id).cloned()
    }

    /// 模拟慢查询
    pub fn set_list_delay(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// 模拟数据库不可用
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FlashSaleError::Database(sea_orm::DbErr::Conn(
                sea_orm::RuntimeErr::Internal("memory store marked unavailable".to_string()),
            )));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, FlashSaleProduct>> {
        // 持锁期间不会panic，中毒时沿用内部数据
        self.products
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn decrement_locked(
        products: &mut BTreeMap<u64, FlashSaleProduct>,
        product_id: u64,
        quantity: u32,
    ) -> StockDeduction {
        match products.get_mut(&product_id) {
            Some(product) if product.remaining_stock >= quantity => {
                product.remaining_stock -= quantity;
                StockDeduction::Applied
            }
            _ => StockDeduction::InsufficientStock,
        }
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn conditional_decrement(
        &self,
        product_id: u64,
        quantity: u32,
    ) -> Result<StockDeduction> {
        self.decrement_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        Ok(Self::decrement_locked(&mut self.lock(), product_id, quantity))
    }

    async fn apply_reservation(
        &self,
        message_id: &str,
        product_id: u64,
        quantity: u32,
    ) -> Result<StockDeduction> {
        self.decrement_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        // 先锁回执再锁商品，回执与扣减在同一临界区内生效
        let mut receipts = self
            .receipts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if receipts.contains(message_id) {
            return Ok(StockDeduction::AlreadyApplied);
        }
        let deduction = Self::decrement_locked(&mut self.lock(), product_id, quantity);
        if deduction == StockDeduction::Applied {
            receipts.insert(message_id.to_string());
        }
        Ok(deduction)
    }

    async fn list_in_stock(&self) -> Result<Vec<FlashSaleProduct>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.check_available()?;

        Ok(self
            .lock()
            .values()
            .filter(|p| p.remaining_stock > 0)
            .cloned()
            .collect())
    }

    async fn bulk_create(&self, products: &[FlashSaleProduct]) -> Result<()> {
        self.check_available()?;

        let mut guard = self.lock();
        if products.iter().any(|p| guard.contains_key(&p.product_id)) {
            return Err(FlashSaleError::Database(sea_orm::DbErr::RecordNotInserted));
        }
        for product in products {
            let mut product = product.clone();
            product.id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            guard.insert(product.product_id, product);
        }
        Ok(())
    }
}
