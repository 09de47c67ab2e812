//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久化中继使用的消息代理接口。
//!
//! 代理按“直连交换机 -> 绑定键 -> 队列”路由消息，消费端手动确认：
//! 取出的消息进入在途集合，直到被 `ack` 或 `nack` 结算。
//! 消费者崩溃后，`recover` 会把在途消息放回队首并标记为重投。

use crate::config::RelayConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 交换机、队列及其绑定关系
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl From<&RelayConfig> for QueueTopology {
    fn from(config: &RelayConfig) -> Self {
        Self {
            exchange: config.exchange.clone(),
            queue: config.queue.clone(),
            routing_key: config.routing_key.clone(),
        }
    }
}

/// 队列中保存的消息信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub body: Vec<u8>,
    #[serde(default)]
    pub redelivered: bool,
}

impl Envelope {
    pub fn new(body: &[u8]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            body: body.to_vec(),
            redelivered: false,
        }
    }

    /// 同一条消息的重投副本
    pub fn redelivery(&self) -> Self {
        Self {
            redelivered: true,
            ..self.clone()
        }
    }
}

/// 一次投递
///
/// 在被结算之前，消息保留在代理的在途集合中。
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub envelope: Envelope,
    /// 代理内部用于定位在途消息的标签
    pub tag: String,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        &self.envelope.body
    }

    pub fn redelivered(&self) -> bool {
        self.envelope.redelivered
    }

    pub fn message_id(&self) -> &str {
        &self.envelope.id
    }
}

/// 消息代理
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 幂等地声明持久化队列和直连绑定
    async fn declare(&self, topology: &QueueTopology) -> Result<()>;

    /// 按绑定路由并持久化地发布消息，无法路由时返回错误
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// 取出至多一条消息放入在途集合，`wait` 内无消息返回 `Ok(None)`
    async fn next_delivery(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>>;

    /// 确认消息，从在途集合删除
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// 否定确认；`requeue` 为真时放回队首并标记重投，否则丢弃
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;

    /// 将所有在途消息放回队首并标记重投，返回数量
    async fn recover(&self, queue: &str) -> Result<usize>;
}
