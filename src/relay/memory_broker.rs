//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 进程内消息代理，语义与Redis代理一致，支持发布故障注入。

use super::broker::{Delivery, Envelope, MessageBroker, QueueTopology};
use crate::error::{FlashSaleError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    // 队首在 front
    ready: VecDeque<Envelope>,
    unacked: HashMap<String, Envelope>,
    // 取出顺序，用于 recover 时保持原有次序
    unacked_order: Vec<String>,
}

impl QueueState {
    fn take_unacked(&mut self, tag: &str) -> Option<Envelope> {
        let envelope = self.unacked.remove(tag)?;
        self.unacked_order.retain(|t| t != tag);
        Some(envelope)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    // (exchange, routing_key) -> queue
    bindings: HashMap<(String, String), String>,
    queues: HashMap<String, QueueState>,
}

/// 内存消息代理
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    fail_publishes: AtomicBool,
    published: AtomicUsize,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟代理不可用，发布直接失败
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// 成功发布的消息数
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    /// 待投递消息数
    pub fn ready_len(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// 在途（未结算）消息数
    pub fn unacked_len(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// 绕过交换机直接写入原始消息体
    pub fn inject_raw(&self, queue: &str, body: &[u8]) {
        self.state()
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(Envelope::new(body));
        self.notify.notify_waiters();
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_take(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.state();
        let queue_state = state.queues.get_mut(queue)?;
        let envelope = queue_state.ready.pop_front()?;
        let tag = envelope.id.clone();
        queue_state.unacked.insert(tag.clone(), envelope.clone());
        queue_state.unacked_order.push(tag.clone());
        Some(Delivery {
            queue: queue.to_string(),
            envelope,
            tag,
        })
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn declare(&self, topology: &QueueTopology) -> Result<()> {
        let mut state = self.state();
        state.queues.entry(topology.queue.clone()).or_default();
        state.bindings.insert(
            (topology.exchange.clone(), topology.routing_key.clone()),
            topology.queue.clone(),
        );
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(FlashSaleError::Broker(
                "memory broker rejected publish".to_string(),
            ));
        }

        {
            let mut state = self.state();
            let queue = state
                .bindings
                .get(&(exchange.to_string(), routing_key.to_string()))
                .cloned()
                .ok_or_else(|| FlashSaleError::Unroutable {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                })?;
            state
                .queues
                .entry(queue)
                .or_default()
                .ready
                .push_back(Envelope::new(payload));
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(queue) {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state();
        if let Some(queue_state) = state.queues.get_mut(&delivery.queue) {
            queue_state.take_unacked(&delivery.tag);
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        {
            let mut state = self.state();
            let Some(queue_state) = state.queues.get_mut(&delivery.queue) else {
                return Ok(());
            };
            let Some(envelope) = queue_state.take_unacked(&delivery.tag) else {
                return Ok(());
            };
            if !requeue {
                debug!("Dropped message {} from {}", envelope.id, delivery.queue);
                return Ok(());
            }
            queue_state.ready.push_front(envelope.redelivery());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn recover(&self, queue: &str) -> Result<usize> {
        let recovered = {
            let mut state = self.state();
            let Some(queue_state) = state.queues.get_mut(queue) else {
                return Ok(0);
            };
            let order = std::mem::take(&mut queue_state.unacked_order);
            let count = order.len();
            // 最早取出的消息最先重投
            for tag in order.into_iter().rev() {
                if let Some(envelope) = queue_state.unacked.remove(&tag) {
                    queue_state.ready.push_front(envelope.redelivery());
                }
            }
            count
        };
        if recovered > 0 {
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }
}
