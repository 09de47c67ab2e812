//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 运行时装配：按固定顺序建立缓存、存储和消息代理连接，
//! 组装预热器、预留引擎和服务，并管理后台消费者的启动与关闭。

use crate::backend::RedisBackend;
use crate::cache::{CacheKeys, StockCache};
use crate::config::Config;
use crate::error::{FlashSaleError, Result};
use crate::lock::DistributedLock;
use crate::relay::{MessageBroker, QueueTopology, RedisBroker, RelayProducer, StockDeductConsumer};
use crate::reservation::ReservationEngine;
use crate::service::SkillService;
use crate::store::{ProductStore, SeaOrmProductStore};
use crate::sync::warmup::CacheWarmer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// 秒杀运行时
///
/// 所有连接句柄在这里显式创建并注入各组件，不使用进程级全局单例。
pub struct FlashSaleRuntime {
    config: Config,
    service: Arc<SkillService>,
    producer: Arc<RelayProducer>,
    consumer: Arc<StockDeductConsumer>,
    shutdown: CancellationToken,
    consumer_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl FlashSaleRuntime {
    /// 按配置连接所有后端
    ///
    /// 顺序：Redis -> 持久化存储 -> 消息代理 -> 组件装配。
    #[instrument(skip(config), level = "info", name = "connect_runtime")]
    pub async fn connect(config: Config) -> Result<Self> {
        let keys = CacheKeys::new(config.cache.key_prefix.clone());
        let redis = RedisBackend::new(&config.redis, keys).await?;
        redis.ping().await?;
        info!("Redis backend connected");

        let store = SeaOrmProductStore::connect(&config.database).await?;
        info!("Durable store connected");

        let broker = RedisBroker::connect(
            redis.raw_client(),
            redis.manager(),
            config.command_timeout(),
        )
        .await?;
        info!("Relay broker connected");

        let redis = Arc::new(redis);
        Ok(Self::from_parts(
            config,
            redis.clone(),
            redis,
            Arc::new(store),
            Arc::new(broker),
        ))
    }

    /// 使用已建立的后端组装运行时
    pub fn from_parts(
        config: Config,
        cache: Arc<dyn StockCache>,
        lock: Arc<dyn DistributedLock>,
        store: Arc<dyn ProductStore>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        let record_ttl = config.cache.record_ttl();
        let producer = Arc::new(RelayProducer::new(
            broker.clone(),
            QueueTopology::from(&config.relay),
            config.command_timeout(),
        ));
        let warmer = Arc::new(CacheWarmer::new(
            cache.clone(),
            lock,
            store.clone(),
            config.warmup.clone(),
            record_ttl,
        ));
        let engine = Arc::new(ReservationEngine::new(
            cache.clone(),
            producer.clone(),
            config.reservation.clone(),
        ));
        let service = Arc::new(SkillService::new(
            store.clone(),
            cache,
            warmer,
            engine,
            record_ttl,
        ));
        let consumer = Arc::new(StockDeductConsumer::new(
            broker,
            store,
            config.relay.queue.clone(),
            Duration::from_millis(config.relay.poll_timeout_ms),
            Duration::from_millis(config.relay.error_backoff_ms),
            config.command_timeout(),
        ));

        Self {
            config,
            service,
            producer,
            consumer,
            shutdown: CancellationToken::new(),
            consumer_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> Arc<SkillService> {
        self.service.clone()
    }

    pub fn consumer(&self) -> Arc<StockDeductConsumer> {
        self.consumer.clone()
    }

    /// 声明消息拓扑，确保消费者启动前队列已绑定
    pub async fn declare_topology(&self) -> Result<()> {
        self.producer.ensure_declared().await
    }

    /// 启动后台消费者，每个运行时只允许一个
    pub async fn spawn_consumer(&self) -> Result<()> {
        let mut task = self.consumer_task.lock().await;
        if task.is_some() {
            return Err(FlashSaleError::Configuration(
                "stock deduct consumer is already running".to_string(),
            ));
        }
        if self.shutdown.is_cancelled() {
            return Err(FlashSaleError::Shutdown(
                "runtime is shutting down".to_string(),
            ));
        }

        self.declare_topology().await?;
        let consumer = self.consumer.clone();
        let token = self.shutdown.child_token();
        *task = Some(tokio::spawn(async move { consumer.run(token).await }));
        info!("Spawned consumer for {}", self.config.relay.queue);
        Ok(())
    }

    /// 消费者是否在运行
    pub async fn consumer_running(&self) -> bool {
        self.consumer_task
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// 取消后台任务并等待在途消息结算完成
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down flash-sale runtime");
        self.shutdown.cancel();

        let handle = self.consumer_task.lock().await.take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(result) => result?,
                Err(e) => {
                    warn!("Consumer task ended abnormally: {}", e);
                    return Err(FlashSaleError::Shutdown(e.to_string()));
                }
            }
        }
        info!("Flash-sale runtime stopped");
        Ok(())
    }
}
