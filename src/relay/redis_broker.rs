//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 基于Redis列表的可靠队列实现。
//!
//! 键布局：
//! - `relay:exchange:{exchange}` 哈希，绑定键 -> 队列名
//! - `relay:queue:{queue}` 待投递列表，左进右出
//! - `relay:queue:{queue}:unacked` 在途列表
//!
//! 阻塞式取消息使用独立连接，避免阻塞缓存和锁共用的连接。

use super::broker::{Delivery, Envelope, MessageBroker, QueueTopology};
use crate::error::{FlashSaleError, Result};
use crate::utils::with_deadline;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// 从在途列表移除并放回队首的脚本
///
/// 仅当消息仍在在途列表中时才放回，避免重复结算造成重复投递。
const REQUEUE_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed == 0 then
    return 0
end
redis.call('RPUSH', KEYS[2], ARGV[2])
return 1
"#;

/// Redis消息代理
pub struct RedisBroker {
    manager: ConnectionManager,
    blocking: Mutex<MultiplexedConnection>,
    command_timeout: Duration,
    requeue: Script,
}

impl RedisBroker {
    /// 使用已有客户端建立代理，并为阻塞操作单独打开一条连接
    #[instrument(skip(client, manager), level = "info", name = "init_redis_broker")]
    pub async fn connect(
        client: &Client,
        manager: ConnectionManager,
        command_timeout: Duration,
    ) -> Result<Self> {
        let blocking = with_deadline(command_timeout * 5, "open broker connection", async {
            client
                .get_multiplexed_async_connection()
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        Ok(Self {
            manager,
            blocking: Mutex::new(blocking),
            command_timeout,
            requeue: Script::new(REQUEUE_SCRIPT),
        })
    }

    fn exchange_key(exchange: &str) -> String {
        format!("relay:exchange:{}", exchange)
    }

    fn ready_key(queue: &str) -> String {
        format!("relay:queue:{}", queue)
    }

    fn unacked_key(queue: &str) -> String {
        format!("relay:queue:{}:unacked", queue)
    }

    /// 待投递消息数
    pub async fn ready_len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        let key = Self::ready_key(queue);
        with_deadline(self.command_timeout, "queue length", async move {
            conn.llen::<_, usize>(&key)
                .await
                .map_err(FlashSaleError::from)
        })
        .await
    }

    /// 在途消息数
    pub async fn unacked_len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        let key = Self::unacked_key(queue);
        with_deadline(self.command_timeout, "unacked length", async move {
            conn.llen::<_, usize>(&key)
                .await
                .map_err(FlashSaleError::from)
        })
        .await
    }

    /// 删除队列的全部消息（测试和运维清理使用）
    pub async fn purge(&self, queue: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let keys = [Self::ready_key(queue), Self::unacked_key(queue)];
        with_deadline(self.command_timeout, "purge queue", async move {
            conn.del::<_, ()>(&keys[..])
                .await
                .map_err(FlashSaleError::from)
        })
        .await
    }

    async fn requeue_raw(&self, queue: &str, raw: &str, envelope: &Envelope) -> Result<bool> {
        let redelivered = serde_json::to_string(&envelope.redelivery())?;
        let mut conn = self.manager.clone();
        let unacked = Self::unacked_key(queue);
        let ready = Self::ready_key(queue);
        let moved: i32 = with_deadline(self.command_timeout, "requeue message", async {
            self.requeue
                .key(&unacked)
                .key(&ready)
                .arg(raw)
                .arg(&redelivered)
                .invoke_async::<i32>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        Ok(moved == 1)
    }

    async fn remove_unacked(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = Self::unacked_key(&delivery.queue);
        let removed: i64 = with_deadline(self.command_timeout, "settle message", async {
            conn.lrem::<_, _, i64>(&key, 1, &delivery.tag)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        if removed == 0 {
            warn!(
                "Message {} was not in flight on {}",
                delivery.message_id(),
                delivery.queue
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RedisBroker {
    #[instrument(skip(self), level = "debug")]
    async fn declare(&self, topology: &QueueTopology) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = Self::exchange_key(&topology.exchange);
        with_deadline(self.command_timeout, "declare binding", async {
            conn.hset::<_, _, _, ()>(&key, &topology.routing_key, &topology.queue)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        info!(
            "Declared binding {} --{}--> {}",
            topology.exchange, topology.routing_key, topology.queue
        );
        Ok(())
    }

    #[instrument(skip(self, payload), level = "debug", fields(size = payload.len()))]
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.manager.clone();
        let exchange_key = Self::exchange_key(exchange);
        let queue: Option<String> = with_deadline(self.command_timeout, "resolve binding", async {
            conn.hget::<_, _, Option<String>>(&exchange_key, routing_key)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        let queue = queue.ok_or_else(|| FlashSaleError::Unroutable {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })?;

        let raw = serde_json::to_string(&Envelope::new(payload))?;
        let ready = Self::ready_key(&queue);
        with_deadline(self.command_timeout, "publish message", async {
            conn.lpush::<_, _, ()>(&ready, &raw)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        debug!("Published message to {}", queue);
        Ok(())
    }

    async fn next_delivery(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        let ready = Self::ready_key(queue);
        let unacked = Self::unacked_key(queue);
        let mut conn = self.blocking.lock().await;
        let raw: Option<String> =
            with_deadline(wait + self.command_timeout, "wait for message", async {
                redis::cmd("BLMOVE")
                    .arg(&ready)
                    .arg(&unacked)
                    .arg("RIGHT")
                    .arg("LEFT")
                    .arg(wait.as_secs_f64().max(0.01))
                    .query_async::<Option<String>>(&mut *conn)
                    .await
                    .map_err(FlashSaleError::from)
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Ok(Some(Delivery {
                queue: queue.to_string(),
                envelope,
                tag: raw,
            })),
            Err(e) => {
                // 非信封格式的原始消息体按普通消息交给消费者判定
                warn!("Message on {} is not an envelope: {}", queue, e);
                Ok(Some(Delivery {
                    queue: queue.to_string(),
                    envelope: Envelope {
                        id: uuid::Uuid::new_v4().to_string(),
                        body: raw.clone().into_bytes(),
                        redelivered: false,
                    },
                    tag: raw,
                }))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.remove_unacked(delivery).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        if !requeue {
            return self.remove_unacked(delivery).await;
        }
        if !self
            .requeue_raw(&delivery.queue, &delivery.tag, &delivery.envelope)
            .await?
        {
            warn!(
                "Message {} was not in flight on {}, not requeued",
                delivery.message_id(),
                delivery.queue
            );
        }
        Ok(())
    }

    #[instrument(skip(self), level = "info")]
    async fn recover(&self, queue: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        let unacked = Self::unacked_key(queue);
        // 列表左侧是最近取出的消息
        let in_flight: Vec<String> = with_deadline(self.command_timeout, "list in-flight", async {
            conn.lrange::<_, Vec<String>>(&unacked, 0, -1)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;

        let mut recovered = 0;
        for raw in &in_flight {
            let envelope = serde_json::from_str::<Envelope>(raw).unwrap_or_else(|_| Envelope {
                id: uuid::Uuid::new_v4().to_string(),
                body: raw.clone().into_bytes(),
                redelivered: false,
            });
            if self.requeue_raw(queue, raw, &envelope).await? {
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!("Recovered {} in-flight messages on {}", recovered, queue);
        }
        Ok(recovered)
    }
}
