//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 基于Redis的库存缓存和分布式锁实现。

use crate::backend::redis_provider::{DefaultRedisProvider, RedisProvider};
use crate::cache::{
    CacheKeys, DecrementOutcome, StockCache, DECREMENT_STOCK_SCRIPT, POPULATE_IF_COLD_SCRIPT,
    RESTORE_STOCK_SCRIPT,
};
use crate::config::{RedisConfig, RedisMode};
use crate::error::{FlashSaleError, Result};
use crate::lock::{DistributedLock, LockToken, RELEASE_LOCK_SCRIPT};
use crate::model::CacheRecord;
use crate::utils::with_deadline;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Redis后端
///
/// 同一个连接管理器同时承载库存缓存和分布式锁两类操作。
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    manager: ConnectionManager,
    keys: CacheKeys,
    command_timeout: Duration,
    scripts: Arc<Scripts>,
}

struct Scripts {
    populate_if_cold: Script,
    decrement: Script,
    restore: Script,
    release: Script,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("keys", &self.keys)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisBackend {
    /// 创建新的Redis后端实例
    #[instrument(skip(config, keys), level = "info", name = "init_redis_backend")]
    pub async fn new(config: &RedisConfig, keys: CacheKeys) -> Result<Self> {
        Self::new_with_provider(config, keys, Arc::new(DefaultRedisProvider)).await
    }

    /// 使用指定的Redis提供者创建后端实例
    #[instrument(skip(config, keys, provider), level = "info", fields(mode = ?config.mode))]
    pub async fn new_with_provider(
        config: &RedisConfig,
        keys: CacheKeys,
        provider: Arc<dyn RedisProvider>,
    ) -> Result<Self> {
        debug!("Initializing RedisBackend with mode: {:?}", config.mode);
        let (client, manager) = match config.mode {
            RedisMode::Standalone => provider.connect_standalone(config).await?,
            RedisMode::Sentinel => provider.connect_sentinel(config).await?,
        };
        Ok(Self {
            client,
            manager,
            keys,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            scripts: Arc::new(Scripts {
                populate_if_cold: Script::new(POPULATE_IF_COLD_SCRIPT),
                decrement: Script::new(DECREMENT_STOCK_SCRIPT),
                restore: Script::new(RESTORE_STOCK_SCRIPT),
                release: Script::new(RELEASE_LOCK_SCRIPT),
            }),
        })
    }

    /// 获取原始Redis客户端，用于建立独立连接（如阻塞式队列消费）
    pub fn raw_client(&self) -> &Client {
        &self.client
    }

    /// 共享连接管理器的副本
    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// 缓存键命名
    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    /// 命令超时时间
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// 检查连接是否正常
    #[instrument(skip(self), level = "debug")]
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        with_deadline(self.command_timeout, "redis ping", async move {
            redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .map(|_| ())
                .map_err(FlashSaleError::from)
        })
        .await
    }

    /// 删除某个商品记录（运维下架使用）
    #[instrument(skip(self), level = "debug")]
    pub async fn retire_product(&self, product_id: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = self.keys.product(product_id);
        let set_key = self.keys.membership();
        with_deadline(self.command_timeout, "retire product", async move {
            redis::pipe()
                .atomic()
                .del(&key)
                .ignore()
                .srem(&set_key, product_id.to_string())
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await
    }
}

#[async_trait]
impl StockCache for RedisBackend {
    #[instrument(skip(self, record), level = "debug", fields(product_id = record.product_id))]
    async fn populate_product(&self, record: &CacheRecord, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = self.keys.product(record.product_id);
        let fields = record.to_fields();
        let ttl_secs = ttl.as_secs().max(1) as i64;
        with_deadline(self.command_timeout, "populate product", async move {
            redis::pipe()
                .atomic()
                .hset_multiple(&key, &fields)
                .ignore()
                .expire(&key, ttl_secs)
                .ignore()
                .query_async::<()>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await
    }

    #[instrument(skip(self, records), level = "debug", fields(record_count = records.len()))]
    async fn populate(&self, records: &[CacheRecord], ttl: Duration) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let ttl_secs = ttl.as_secs().max(1) as i64;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for record in records {
            let key = self.keys.product(record.product_id);
            pipe.hset_multiple(&key, &record.to_fields()).ignore();
            pipe.expire(&key, ttl_secs).ignore();
        }
        let ids: Vec<String> = records.iter().map(|r| r.product_id.to_string()).collect();
        pipe.sadd(self.keys.membership(), ids).ignore();

        let mut conn = self.manager.clone();
        with_deadline(self.command_timeout, "populate batch", async move {
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        debug!("Populated {} product records in one transaction", records.len());
        Ok(())
    }

    #[instrument(skip(self, records), level = "debug", fields(record_count = records.len()))]
    async fn populate_if_cold(&self, records: &[CacheRecord], ttl: Duration) -> Result<bool> {
        if records.is_empty() {
            return Ok(true);
        }

        let ttl_secs = ttl.as_secs().max(1) as i64;
        let mut keys = Vec::with_capacity(records.len() + 1);
        keys.push(self.keys.membership());
        let mut args: Vec<String> = Vec::new();
        let mut field_args = 0;
        for record in records {
            let fields = record.to_fields();
            field_args = fields.len() * 2;
            keys.push(self.keys.product(record.product_id));
            args.push(record.product_id.to_string());
            for (name, value) in fields {
                args.push(name.to_string());
                args.push(value);
            }
        }

        let mut conn = self.manager.clone();
        let scripts = self.scripts.clone();
        let written: i64 = with_deadline(self.command_timeout, "populate if cold", async move {
            let mut invocation = scripts.populate_if_cold.prepare_invoke();
            for key in &keys {
                invocation.key(key);
            }
            invocation.arg(ttl_secs).arg(field_args);
            for arg in &args {
                invocation.arg(arg);
            }
            invocation
                .invoke_async::<i64>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;

        if written == 1 {
            debug!("Populated {} product records into cold cache", records.len());
        } else {
            debug!("Cache already populated, discarded {} records", records.len());
        }
        Ok(written == 1)
    }

    #[instrument(skip(self, product_ids), level = "debug")]
    async fn add_to_membership(&self, product_ids: &[u64]) -> Result<()> {
        if product_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let set_key = self.keys.membership();
        let ids: Vec<String> = product_ids.iter().map(u64::to_string).collect();
        with_deadline(self.command_timeout, "add to membership", async move {
            conn.sadd::<_, _, ()>(&set_key, ids)
                .await
                .map_err(FlashSaleError::from)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn membership(&self) -> Result<BTreeSet<u64>> {
        let mut conn = self.manager.clone();
        let set_key = self.keys.membership();
        let members: Vec<String> = with_deadline(self.command_timeout, "read membership", async {
            conn.smembers::<_, Vec<String>>(&set_key)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;

        let mut ids = BTreeSet::new();
        for member in members {
            match member.parse::<u64>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => warn!("Ignoring malformed member '{}' in {}", member, set_key),
            }
        }
        Ok(ids)
    }

    #[instrument(skip(self), level = "debug")]
    async fn is_member(&self, product_id: u64) -> Result<bool> {
        let mut conn = self.manager.clone();
        let set_key = self.keys.membership();
        with_deadline(self.command_timeout, "check membership", async move {
            conn.sismember::<_, _, bool>(&set_key, product_id.to_string())
                .await
                .map_err(FlashSaleError::from)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn record(&self, product_id: u64) -> Result<Option<CacheRecord>> {
        let mut conn = self.manager.clone();
        let key = self.keys.product(product_id);
        let fields: HashMap<String, String> =
            with_deadline(self.command_timeout, "read record", async move {
                conn.hgetall::<_, HashMap<String, String>>(&key)
                    .await
                    .map_err(FlashSaleError::from)
            })
            .await?;
        CacheRecord::from_fields(&fields)
    }

    #[instrument(skip(self, product_ids), level = "debug", fields(count = product_ids.len()))]
    async fn records(&self, product_ids: &[u64]) -> Result<Vec<CacheRecord>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in product_ids {
            pipe.hgetall(self.keys.product(*id));
        }
        let mut conn = self.manager.clone();
        let hashes: Vec<HashMap<String, String>> =
            with_deadline(self.command_timeout, "read records", async move {
                pipe.query_async::<Vec<HashMap<String, String>>>(&mut conn)
                    .await
                    .map_err(FlashSaleError::from)
            })
            .await?;

        let mut records = Vec::with_capacity(hashes.len());
        for fields in &hashes {
            match CacheRecord::from_fields(fields) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable product record: {}", e),
            }
        }
        Ok(records)
    }

    #[instrument(skip(self), level = "debug")]
    async fn decrement_stock(&self, product_id: u64, quantity: u32) -> Result<DecrementOutcome> {
        let mut conn = self.manager.clone();
        let key = self.keys.product(product_id);
        let scripts = self.scripts.clone();
        let value: i64 = with_deadline(self.command_timeout, "decrement stock", async move {
            scripts
                .decrement
                .key(&key)
                .arg(quantity)
                .invoke_async::<i64>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        Ok(DecrementOutcome::from_script_result(value))
    }

    #[instrument(skip(self), level = "debug")]
    async fn restore_stock(&self, product_id: u64, quantity: u32) -> Result<bool> {
        let mut conn = self.manager.clone();
        let key = self.keys.product(product_id);
        let scripts = self.scripts.clone();
        let value: i64 = with_deadline(self.command_timeout, "restore stock", async move {
            scripts
                .restore
                .key(&key)
                .arg(quantity)
                .invoke_async::<i64>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        Ok(value >= 0)
    }
}

#[async_trait]
impl DistributedLock for RedisBackend {
    #[instrument(skip(self), level = "debug")]
    async fn try_acquire(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        debug!(
            "Attempting to acquire lock: key={}, token={:?}, ttl={}ms",
            key, token, ttl_ms
        );
        let result: Option<String> = with_deadline(self.command_timeout, "acquire lock", async {
            redis::cmd("SET")
                .arg(key)
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async::<Option<String>>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        debug!("Lock acquisition result: success={}", result.is_some());
        Ok(result.is_some())
    }

    #[instrument(skip(self), level = "debug")]
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.manager.clone();
        let scripts = self.scripts.clone();
        let result: i32 = with_deadline(self.command_timeout, "release lock", async {
            scripts
                .release
                .key(key)
                .arg(token.as_str())
                .invoke_async::<i32>(&mut conn)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        Ok(result == 1)
    }
}
