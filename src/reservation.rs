//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 预留引擎：面向请求的秒杀下单入口。
//!
//! 流程：校验商品在可售集合中 -> 缓存脚本原子扣减1件 -> 投递预留消息。
//! 商品不存在和库存不足是正常的业务结果，不是错误；
//! 扣减成功但投递失败是单独的错误 [`FlashSaleError::EnqueueFailed`]。

use crate::cache::{DecrementOutcome, StockCache};
use crate::config::ReservationConfig;
use crate::error::{FlashSaleError, Result};
use crate::metrics::GLOBAL_METRICS;
use crate::model::ReservationMessage;
use crate::relay::RelayProducer;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

/// 每次预留的数量
pub const RESERVE_QUANTITY: u32 = 1;

/// 预留结果（业务层面）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// 预留成功并已投递持久化消息
    Reserved { product_id: u64, remaining: u64 },
    /// 库存不足
    OutOfStock { product_id: u64 },
    /// 商品不在可售集合中
    UnknownProduct { product_id: u64 },
}

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoSuchProduct,
    OutOfStock,
}

/// 单次预留尝试的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Validating,
    Decrementing,
    Rejected(RejectReason),
    Reserved,
    Enqueuing,
    Committed,
    EnqueueFailed,
}

impl ReservationState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationState::Rejected(_)
                | ReservationState::Committed
                | ReservationState::EnqueueFailed
        )
    }

    /// 状态转移是否合法
    pub fn can_transition_to(&self, next: ReservationState) -> bool {
        use ReservationState::*;
        matches!(
            (self, next),
            (Validating, Decrementing)
                | (Validating, Rejected(RejectReason::NoSuchProduct))
                | (Decrementing, Rejected(RejectReason::OutOfStock))
                | (Decrementing, Reserved)
                | (Reserved, Enqueuing)
                | (Enqueuing, Committed)
                | (Enqueuing, EnqueueFailed)
        )
    }
}

struct Attempt {
    product_id: u64,
    state: ReservationState,
}

impl Attempt {
    fn new(product_id: u64) -> Self {
        Self {
            product_id,
            state: ReservationState::Validating,
        }
    }

    fn advance(&mut self, next: ReservationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal reservation transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(
            product_id = self.product_id,
            "reservation {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

/// 对用户可见的答复，不包含任何后端信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseReply {
    Reserved,
    OutOfStock,
    UnknownProduct,
    TryAgainShortly,
}

impl PurchaseReply {
    pub fn from_result(result: &Result<ReservationOutcome>) -> Self {
        match result {
            Ok(ReservationOutcome::Reserved { .. }) => PurchaseReply::Reserved,
            Ok(ReservationOutcome::OutOfStock { .. }) => PurchaseReply::OutOfStock,
            Ok(ReservationOutcome::UnknownProduct { .. }) => PurchaseReply::UnknownProduct,
            Err(_) => PurchaseReply::TryAgainShortly,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PurchaseReply::Reserved => "reserved",
            PurchaseReply::OutOfStock => "out of stock",
            PurchaseReply::UnknownProduct => "unknown product",
            PurchaseReply::TryAgainShortly => "try again shortly",
        }
    }
}

impl fmt::Display for PurchaseReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// 预留引擎
pub struct ReservationEngine {
    cache: Arc<dyn StockCache>,
    producer: Arc<RelayProducer>,
    config: ReservationConfig,
}

impl ReservationEngine {
    pub fn new(
        cache: Arc<dyn StockCache>,
        producer: Arc<RelayProducer>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            cache,
            producer,
            config,
        }
    }

    /// 为当前请求预留一件商品
    #[instrument(skip(self), level = "debug")]
    pub async fn reserve(&self, product_id: u64) -> Result<ReservationOutcome> {
        let start = Instant::now();
        let result = self.reserve_inner(product_id).await;
        let label = match &result {
            Ok(ReservationOutcome::Reserved { .. }) => "reserved",
            Ok(ReservationOutcome::OutOfStock { .. }) => "out_of_stock",
            Ok(ReservationOutcome::UnknownProduct { .. }) => "unknown_product",
            Err(FlashSaleError::EnqueueFailed { .. }) => "enqueue_failed",
            Err(_) => "error",
        };
        GLOBAL_METRICS.record_event("reservation", "reserve", label);
        GLOBAL_METRICS.record_duration("reservation", "reserve", start.elapsed().as_secs_f64());
        result
    }

    async fn reserve_inner(&self, product_id: u64) -> Result<ReservationOutcome> {
        let mut attempt = Attempt::new(product_id);

        if !self.cache.is_member(product_id).await? {
            attempt.advance(ReservationState::Rejected(RejectReason::NoSuchProduct));
            debug!("Product {} is not on sale", product_id);
            return Ok(ReservationOutcome::UnknownProduct { product_id });
        }
        attempt.advance(ReservationState::Decrementing);

        let remaining = match self
            .cache
            .decrement_stock(product_id, RESERVE_QUANTITY)
            .await?
        {
            DecrementOutcome::Remaining(remaining) => remaining,
            DecrementOutcome::Insufficient => {
                attempt.advance(ReservationState::Rejected(RejectReason::OutOfStock));
                return Ok(ReservationOutcome::OutOfStock { product_id });
            }
        };
        attempt.advance(ReservationState::Reserved);

        attempt.advance(ReservationState::Enqueuing);
        if let Err(e) = self
            .producer
            .publish(&ReservationMessage::new(product_id))
            .await
        {
            attempt.advance(ReservationState::EnqueueFailed);
            error!(
                product_id,
                "Reserved in cache but failed to enqueue durable decrement: {}", e
            );
            self.compensate(product_id).await;
            return Err(FlashSaleError::EnqueueFailed {
                product_id,
                reason: e.to_string(),
            });
        }
        attempt.advance(ReservationState::Committed);

        info!(
            "Reserved product {}, {} left in cache",
            product_id, remaining
        );
        Ok(ReservationOutcome::Reserved {
            product_id,
            remaining,
        })
    }

    async fn compensate(&self, product_id: u64) {
        if !self.config.rollback_on_enqueue_failure {
            warn!(
                product_id,
                "Cache stock left decremented; durable store needs reconciliation"
            );
            return;
        }
        match self.cache.restore_stock(product_id, RESERVE_QUANTITY).await {
            Ok(true) => info!("Rolled back cache reservation for product {}", product_id),
            Ok(false) => warn!(
                "Cache record for product {} expired, nothing to roll back",
                product_id
            ),
            Err(e) => error!(
                product_id,
                "Failed to roll back cache reservation: {}", e
            ),
        }
    }
}
