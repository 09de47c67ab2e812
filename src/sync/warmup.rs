//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 冷缓存预热：分布式锁 + 双重检查 + 有界重试。

use crate::cache::StockCache;
use crate::config::WarmupConfig;
use crate::error::{FlashSaleError, Result};
use crate::lock::{DistributedLock, LockToken};
use crate::metrics::GLOBAL_METRICS;
use crate::model::CacheRecord;
use crate::store::ProductStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// 预热结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// 首次检查时缓存已是热的
    AlreadyWarm { product_ids: BTreeSet<u64> },
    /// 本调用者持有锁并完成了回源加载
    Loaded {
        product_ids: BTreeSet<u64>,
        loaded: usize,
    },
    /// 其他调用者完成了加载（双重检查命中，或等待期间观察到）
    PopulatedByPeer { product_ids: BTreeSet<u64> },
}

impl WarmupOutcome {
    /// 预热完成后的可售商品ID
    pub fn product_ids(&self) -> &BTreeSet<u64> {
        match self {
            WarmupOutcome::AlreadyWarm { product_ids }
            | WarmupOutcome::Loaded { product_ids, .. }
            | WarmupOutcome::PopulatedByPeer { product_ids } => product_ids,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WarmupOutcome::AlreadyWarm { .. } => "already_warm",
            WarmupOutcome::Loaded { .. } => "loaded",
            WarmupOutcome::PopulatedByPeer { .. } => "populated_by_peer",
        }
    }
}

/// 缓存预热器
///
/// 可售集合为空时，只允许一个调用者从持久化存储回源并整批写入缓存，
/// 其余调用者短暂轮询，超过重试次数后返回 [`FlashSaleError::TemporarilyUnavailable`]。
pub struct CacheWarmer {
    cache: Arc<dyn StockCache>,
    lock: Arc<dyn DistributedLock>,
    store: Arc<dyn ProductStore>,
    config: WarmupConfig,
    record_ttl: Duration,
}

impl CacheWarmer {
    pub fn new(
        cache: Arc<dyn StockCache>,
        lock: Arc<dyn DistributedLock>,
        store: Arc<dyn ProductStore>,
        config: WarmupConfig,
        record_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            lock,
            store,
            config,
            record_ttl,
        }
    }

    /// 确保缓存已预热
    #[instrument(skip(self), level = "debug")]
    pub async fn ensure_warm(&self) -> Result<WarmupOutcome> {
        let start = Instant::now();
        let result = self.ensure_warm_inner().await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(FlashSaleError::TemporarilyUnavailable(_)) => "unavailable",
            Err(_) => "error",
        };
        GLOBAL_METRICS.record_event("warmup", "ensure_warm", label);
        GLOBAL_METRICS.record_duration("warmup", "ensure_warm", start.elapsed().as_secs_f64());
        result
    }

    async fn ensure_warm_inner(&self) -> Result<WarmupOutcome> {
        let product_ids = self.cache.membership().await?;
        if !product_ids.is_empty() {
            return Ok(WarmupOutcome::AlreadyWarm { product_ids });
        }

        let token = LockToken::generate();
        let acquired = self
            .lock
            .try_acquire(&self.config.lock_key, &token, self.config.lock_ttl())
            .await?;

        if acquired {
            debug!("Acquired warm-up lock {}", self.config.lock_key);
            let result = self.load_under_lock().await;
            self.release_quietly(&token).await;
            result
        } else {
            debug!(
                "Warm-up lock {} held by another caller, waiting",
                self.config.lock_key
            );
            self.wait_for_peer().await
        }
    }

    async fn load_under_lock(&self) -> Result<WarmupOutcome> {
        // 双重检查：加锁前其他调用者可能已经完成加载
        let product_ids = self.cache.membership().await?;
        if !product_ids.is_empty() {
            debug!("Cache populated by a peer before lock acquisition");
            return Ok(WarmupOutcome::PopulatedByPeer { product_ids });
        }

        let products = self.store.list_in_stock().await?;
        let records: Vec<CacheRecord> = products.iter().map(CacheRecord::from).collect();
        // 回源期间锁可能已过期，写入只在集合仍为空时生效
        if !self.cache.populate_if_cold(&records, self.record_ttl).await? {
            warn!(
                "Warm-up lock {} outlived by durable read, discarding {} loaded records",
                self.config.lock_key,
                records.len()
            );
            let product_ids = self.cache.membership().await?;
            return Ok(WarmupOutcome::PopulatedByPeer { product_ids });
        }

        let product_ids: BTreeSet<u64> = records.iter().map(|r| r.product_id).collect();
        info!(
            "Warmed flash-sale cache with {} products from durable store",
            records.len()
        );
        Ok(WarmupOutcome::Loaded {
            loaded: records.len(),
            product_ids,
        })
    }

    async fn wait_for_peer(&self) -> Result<WarmupOutcome> {
        for attempt in 1..=self.config.retry_times {
            tokio::time::sleep(self.config.retry_interval()).await;
            let product_ids = self.cache.membership().await?;
            if !product_ids.is_empty() {
                debug!("Observed warmed cache after {} polls", attempt);
                return Ok(WarmupOutcome::PopulatedByPeer { product_ids });
            }
        }

        warn!(
            "Cache still cold after {} polls of {}ms",
            self.config.retry_times, self.config.retry_interval_ms
        );
        Err(FlashSaleError::TemporarilyUnavailable(
            "flash-sale catalogue is warming up".to_string(),
        ))
    }

    async fn release_quietly(&self, token: &LockToken) {
        match self.lock.release(&self.config.lock_key, token).await {
            Ok(true) => debug!("Released warm-up lock {}", self.config.lock_key),
            Ok(false) => warn!(
                "Warm-up lock {} expired before release",
                self.config.lock_key
            ),
            // 释放失败依赖TTL自愈
            Err(e) => warn!(
                "Failed to release warm-up lock {}: {}",
                self.config.lock_key, e
            ),
        }
    }
}
