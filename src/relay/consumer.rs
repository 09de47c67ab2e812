//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 持久化中继的消费端：逐条取出预留消息，在持久化存储上条件扣减库存，
//! 并根据结果显式确认、丢弃或重新入队。
//!
//! 每个队列只运行一个消费者，且只有在当前消息结算后才取下一条（预取为1）。

use super::broker::{Delivery, MessageBroker};
use crate::error::Result;
use crate::metrics::GLOBAL_METRICS;
use crate::model::ReservationMessage;
use crate::store::{ProductStore, StockDeduction};
use crate::utils::with_deadline;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// 消息结算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// 确认并删除
    Ack,
    /// 否定确认且不重新入队（毒消息）
    Reject,
    /// 否定确认并放回队首等待重试
    Requeue,
}

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// 持久化扣减成功
    Deducted { product_id: u64 },
    /// 重复投递，该消息此前已经扣减过
    Duplicate { product_id: u64 },
    /// 缓存已放行但持久化库存不足，缓存与存储出现分歧
    IntegrityViolation { product_id: u64 },
    /// 消息体无法解析
    Malformed { reason: String },
    /// 存储暂时不可用
    Transient { product_id: u64, reason: String },
    /// 存储返回不可重试的错误（如约束或表结构错误）
    Failed { product_id: u64, reason: String },
}

impl ConsumeOutcome {
    pub fn decision(&self) -> AckDecision {
        match self {
            ConsumeOutcome::Deducted { .. }
            | ConsumeOutcome::Duplicate { .. }
            | ConsumeOutcome::IntegrityViolation { .. } => AckDecision::Ack,
            ConsumeOutcome::Malformed { .. } | ConsumeOutcome::Failed { .. } => {
                AckDecision::Reject
            }
            ConsumeOutcome::Transient { .. } => AckDecision::Requeue,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ConsumeOutcome::Deducted { .. } => "deducted",
            ConsumeOutcome::Duplicate { .. } => "duplicate",
            ConsumeOutcome::IntegrityViolation { .. } => "integrity_violation",
            ConsumeOutcome::Malformed { .. } => "malformed",
            ConsumeOutcome::Transient { .. } => "requeued",
            ConsumeOutcome::Failed { .. } => "store_failure",
        }
    }
}

/// 库存扣减消费者
pub struct StockDeductConsumer {
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn ProductStore>,
    queue: String,
    poll_timeout: Duration,
    error_backoff: Duration,
    settle_timeout: Duration,
}

impl StockDeductConsumer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        store: Arc<dyn ProductStore>,
        queue: impl Into<String>,
        poll_timeout: Duration,
        error_backoff: Duration,
        settle_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            store,
            queue: queue.into(),
            poll_timeout,
            error_backoff,
            settle_timeout,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 处理一条消息并给出结果，不做结算
    #[instrument(skip(self, delivery), level = "debug", fields(message_id = delivery.message_id(), redelivered = delivery.redelivered()))]
    pub async fn handle(&self, delivery: &Delivery) -> ConsumeOutcome {
        let message = match ReservationMessage::decode(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping malformed message {} on {}: {}",
                    delivery.message_id(),
                    self.queue,
                    e
                );
                return ConsumeOutcome::Malformed {
                    reason: e.to_string(),
                };
            }
        };
        let product_id = message.product_id;

        match self
            .store
            .apply_reservation(delivery.message_id(), product_id, 1)
            .await
        {
            Ok(StockDeduction::Applied) => {
                debug!("Durable stock decremented for product {}", product_id);
                ConsumeOutcome::Deducted { product_id }
            }
            Ok(StockDeduction::AlreadyApplied) => {
                info!(
                    "Message {} for product {} was already applied, acknowledging",
                    delivery.message_id(),
                    product_id
                );
                ConsumeOutcome::Duplicate { product_id }
            }
            Ok(StockDeduction::InsufficientStock) => {
                error!(
                    product_id,
                    redelivered = delivery.redelivered(),
                    "Integrity violation: cache approved a reservation but durable stock is exhausted"
                );
                ConsumeOutcome::IntegrityViolation { product_id }
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    "Durable decrement for product {} failed, will retry: {}",
                    product_id, e
                );
                ConsumeOutcome::Transient {
                    product_id,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(
                    product_id,
                    message_id = delivery.message_id(),
                    "Durable decrement failed permanently, dropping message: {}",
                    e
                );
                ConsumeOutcome::Failed {
                    product_id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// 按决定结算消息
    pub async fn settle(&self, delivery: &Delivery, decision: AckDecision) -> Result<()> {
        let settle = async {
            match decision {
                AckDecision::Ack => self.broker.ack(delivery).await,
                AckDecision::Reject => self.broker.nack(delivery, false).await,
                AckDecision::Requeue => self.broker.nack(delivery, true).await,
            }
        };
        with_deadline(self.settle_timeout, "settle delivery", settle).await
    }

    /// 取出、处理并结算一条消息；等待超时无消息时返回 `Ok(None)`
    pub async fn process_one(&self) -> Result<Option<ConsumeOutcome>> {
        let Some(delivery) = self.fetch().await? else {
            return Ok(None);
        };
        Ok(Some(self.process_delivery(&delivery).await?))
    }

    async fn fetch(&self) -> Result<Option<Delivery>> {
        self.broker
            .next_delivery(&self.queue, self.poll_timeout)
            .await
    }

    async fn process_delivery(&self, delivery: &Delivery) -> Result<ConsumeOutcome> {
        let start = Instant::now();
        let outcome = self.handle(delivery).await;
        self.settle(delivery, outcome.decision()).await?;
        GLOBAL_METRICS.record_event("relay", "consume", outcome.label());
        GLOBAL_METRICS.record_duration("relay", "consume", start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// 运行消费循环直到取消
    ///
    /// 启动时先恢复上次遗留的在途消息。取消只在等待消息时生效，
    /// 正在处理的消息会先完成结算。
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Stock deduct consumer starting on {}", self.queue);
        GLOBAL_METRICS.set_consumer_running(&self.queue, true);

        match self.broker.recover(&self.queue).await {
            Ok(0) => {}
            Ok(n) => info!("Re-queued {} unsettled messages on {}", n, self.queue),
            Err(e) => warn!("Failed to recover in-flight messages on {}: {}", self.queue, e),
        }

        loop {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = self.fetch() => fetched,
            };

            let backoff = match fetched {
                Ok(None) => false,
                Ok(Some(delivery)) => match self.process_delivery(&delivery).await {
                    Ok(outcome) => outcome.decision() == AckDecision::Requeue,
                    Err(e) => {
                        error!(
                            "Failed to settle message {} on {}: {}",
                            delivery.message_id(),
                            self.queue,
                            e
                        );
                        true
                    }
                },
                Err(e) => {
                    warn!("Failed to fetch from {}: {}", self.queue, e);
                    true
                }
            };

            if backoff {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.error_backoff) => {}
                }
            }
        }

        GLOBAL_METRICS.set_consumer_running(&self.queue, false);
        info!("Stock deduct consumer on {} stopped", self.queue);
        Ok(())
    }
}

impl std::fmt::Debug for StockDeductConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockDeductConsumer")
            .field("queue", &self.queue)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}
