//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 进程内的库存缓存和互斥锁实现。
//!
//! 语义与Redis后端一致：扣减在单个临界区内完成“检查+修改”，
//! 记录带过期时间，锁按持有者令牌释放。用于测试、基准和单机演示。

use crate::cache::{DecrementOutcome, StockCache};
use crate::error::Result;
use crate::lock::{DistributedLock, LockToken};
use crate::model::CacheRecord;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct CacheState {
    // product_id -> (记录, 过期时刻)
    records: HashMap<u64, (CacheRecord, Instant)>,
    members: BTreeSet<u64>,
}

impl CacheState {
    fn live_record_mut(&mut self, product_id: u64) -> Option<&mut CacheRecord> {
        let expired = matches!(
            self.records.get(&product_id),
            Some((_, expire_at)) if Instant::now() >= *expire_at
        );
        if expired {
            self.records.remove(&product_id);
        }
        self.records.get_mut(&product_id).map(|(record, _)| record)
    }
}

/// 内存库存缓存
#[derive(Debug, Default)]
pub struct MemoryStockCache {
    state: Mutex<CacheState>,
    populate_calls: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批量写入被调用的次数
    pub fn populate_calls(&self) -> usize {
        self.populate_calls.load(Ordering::SeqCst)
    }

    /// 模拟写入失败（批量写入整体不生效）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 清空所有记录和集合，模拟缓存被驱逐
    pub fn clear(&self) {
        let mut state = self.state();
        state.records.clear();
        state.members.clear();
    }

    /// 直接读取库存字段
    pub fn stock(&self, product_id: u64) -> Option<i64> {
        self.state()
            .live_record_mut(product_id)
            .map(|record| record.stock)
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(crate::error::FlashSaleError::TemporarilyUnavailable(
                "memory cache rejected write".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StockCache for MemoryStockCache {
    async fn populate_product(&self, record: &CacheRecord, ttl: Duration) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state();
        state
            .records
            .insert(record.product_id, (record.clone(), Instant::now() + ttl));
        Ok(())
    }

    #[instrument(skip(self, records), level = "debug", fields(record_count = records.len()))]
    async fn populate(&self, records: &[CacheRecord], ttl: Duration) -> Result<()> {
        self.populate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        if records.is_empty() {
            return Ok(());
        }

        let expire_at = Instant::now() + ttl;
        let mut state = self.state();
        for record in records {
            state
                .records
                .insert(record.product_id, (record.clone(), expire_at));
            state.members.insert(record.product_id);
        }
        debug!("Populated {} records in memory cache", records.len());
        Ok(())
    }

    #[instrument(skip(self, records), level = "debug", fields(record_count = records.len()))]
    async fn populate_if_cold(&self, records: &[CacheRecord], ttl: Duration) -> Result<bool> {
        self.populate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        if records.is_empty() {
            return Ok(true);
        }

        let expire_at = Instant::now() + ttl;
        let mut state = self.state();
        if !state.members.is_empty() {
            debug!("Memory cache already populated, discarding {} records", records.len());
            return Ok(false);
        }
        for record in records {
            state
                .records
                .insert(record.product_id, (record.clone(), expire_at));
            state.members.insert(record.product_id);
        }
        Ok(true)
    }

    async fn add_to_membership(&self, product_ids: &[u64]) -> Result<()> {
        self.check_writable()?;
        self.state().members.extend(product_ids.iter().copied());
        Ok(())
    }

    async fn membership(&self) -> Result<BTreeSet<u64>> {
        Ok(self.state().members.clone())
    }

    async fn is_member(&self, product_id: u64) -> Result<bool> {
        Ok(self.state().members.contains(&product_id))
    }

    async fn record(&self, product_id: u64) -> Result<Option<CacheRecord>> {
        Ok(self.state().live_record_mut(product_id).map(|r| r.clone()))
    }

    async fn decrement_stock(&self, product_id: u64, quantity: u32) -> Result<DecrementOutcome> {
        let mut state = self.state();
        let Some(record) = state.live_record_mut(product_id) else {
            return Ok(DecrementOutcome::Insufficient);
        };
        let quantity = i64::from(quantity);
        if record.stock < quantity {
            return Ok(DecrementOutcome::Insufficient);
        }
        record.stock -= quantity;
        Ok(DecrementOutcome::Remaining(record.stock as u64))
    }

    async fn restore_stock(&self, product_id: u64, quantity: u32) -> Result<bool> {
        let mut state = self.state();
        match state.live_record_mut(product_id) {
            Some(record) => {
                record.stock += i64::from(quantity);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// 内存互斥锁
#[derive(Debug, Default)]
pub struct MemoryLock {
    // key -> (持有者令牌, 租约到期时刻)
    held: DashMap<String, (LockToken, Instant)>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前持有者（租约过期视为无人持有）
    pub fn holder(&self, key: &str) -> Option<LockToken> {
        self.held
            .get(key)
            .filter(|entry| Instant::now() < entry.1)
            .map(|entry| entry.0.clone())
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.held.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if now < occupied.get().1 {
                    return Ok(false);
                }
                occupied.insert((token.clone(), now + ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert((token.clone(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        Ok(self
            .held
            .remove_if(key, |_, (holder, expire_at)| {
                holder == token && Instant::now() < *expire_at
            })
            .is_some())
    }
}
