//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 秒杀服务门面：开售初始化、商品列表、商品详情和下单预留。

use crate::cache::StockCache;
use crate::error::Result;
use crate::model::{CacheRecord, FlashSaleProduct};
use crate::reservation::{PurchaseReply, ReservationEngine, ReservationOutcome};
use crate::store::ProductStore;
use crate::sync::warmup::CacheWarmer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// 秒杀服务
pub struct SkillService {
    store: Arc<dyn ProductStore>,
    cache: Arc<dyn StockCache>,
    warmer: Arc<CacheWarmer>,
    engine: Arc<ReservationEngine>,
    record_ttl: Duration,
}

impl SkillService {
    pub fn new(
        store: Arc<dyn ProductStore>,
        cache: Arc<dyn StockCache>,
        warmer: Arc<CacheWarmer>,
        engine: Arc<ReservationEngine>,
        record_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            warmer,
            engine,
            record_ttl,
        }
    }

    /// 开售初始化
    ///
    /// 先批量写入持久化存储，再把有库存的商品整批写入缓存。返回写入缓存的商品数。
    #[instrument(skip(self, products), level = "info", fields(product_count = products.len()))]
    pub async fn init_sale(&self, products: &[FlashSaleProduct]) -> Result<usize> {
        self.store.bulk_create(products).await?;

        let records: Vec<CacheRecord> = products
            .iter()
            .filter(|p| p.remaining_stock > 0)
            .map(CacheRecord::from)
            .collect();
        self.cache.populate(&records, self.record_ttl).await?;

        info!(
            "Flash sale initialised: {} products stored, {} on sale",
            products.len(),
            records.len()
        );
        Ok(records.len())
    }

    /// 列出当前可购买的商品，按商品ID排序
    ///
    /// 可售集合为空时触发预热；已过期的记录会被跳过。
    #[instrument(skip(self), level = "debug")]
    pub async fn list_products(&self) -> Result<Vec<CacheRecord>> {
        let mut product_ids = self.cache.membership().await?;
        if product_ids.is_empty() {
            product_ids = self.warmer.ensure_warm().await?.product_ids().clone();
        }
        let ids: Vec<u64> = product_ids.into_iter().collect();
        let mut records = self.cache.records(&ids).await?;
        records.sort_by_key(|r| r.product_id);
        Ok(records)
    }

    /// 读取单个商品的缓存记录
    pub async fn product_detail(&self, product_id: u64) -> Result<Option<CacheRecord>> {
        self.cache.record(product_id).await
    }

    /// 预留一件商品
    pub async fn reserve(&self, product_id: u64) -> Result<ReservationOutcome> {
        self.engine.reserve(product_id).await
    }

    /// 预留一件商品并转换为用户可见答复
    pub async fn purchase(&self, product_id: u64) -> PurchaseReply {
        PurchaseReply::from_result(&self.engine.reserve(product_id).await)
    }
}
