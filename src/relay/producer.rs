//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 持久化中继的生产端。

use super::broker::{MessageBroker, QueueTopology};
use crate::error::Result;
use crate::model::ReservationMessage;
use crate::utils::with_deadline;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// 预留消息生产者
///
/// 首次发布前声明一次拓扑；声明失败时下次发布会重新尝试。
pub struct RelayProducer {
    broker: Arc<dyn MessageBroker>,
    topology: QueueTopology,
    declared: OnceCell<()>,
    publish_timeout: Duration,
}

impl RelayProducer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        topology: QueueTopology,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            topology,
            declared: OnceCell::new(),
            publish_timeout,
        }
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    /// 确保交换机、队列和绑定已声明
    pub async fn ensure_declared(&self) -> Result<()> {
        self.declared
            .get_or_try_init(|| async {
                with_deadline(
                    self.publish_timeout,
                    "declare topology",
                    self.broker.declare(&self.topology),
                )
                .await
            })
            .await?;
        Ok(())
    }

    /// 发布预留消息，任何失败都作为错误返回
    #[instrument(skip(self), level = "debug", fields(product_id = message.product_id))]
    pub async fn publish(&self, message: &ReservationMessage) -> Result<()> {
        self.ensure_declared().await?;
        let payload = message.encode()?;
        with_deadline(
            self.publish_timeout,
            "publish reservation",
            self.broker.publish(
                &self.topology.exchange,
                &self.topology.routing_key,
                &payload,
            ),
        )
        .await?;
        debug!("Reservation for product {} handed off", message.product_id);
        Ok(())
    }
}
