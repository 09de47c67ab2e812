//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀系统的配置结构和解析逻辑。

use crate::error::{FlashSaleError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

/// 顶层配置
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub warmup: WarmupConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
}

/// Redis部署模式
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式
    Sentinel,
}

/// Redis连接配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis模式
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒），缓存、锁和队列调用都受其约束
    pub command_timeout_ms: u64,
    /// Redis 密码（可选）
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://localhost:6379".to_string().into()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 1000,
            password: None,
            enable_tls: false,
            sentinel: None,
        }
    }
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 持久化数据库配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据库连接URL（sqlite/mysql/postgres）
    pub url: SecretString,
    /// 最大连接数
    pub max_connections: u32,
    /// 连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 单条语句超时（毫秒）
    pub query_timeout_ms: u64,
    /// 批量写入时单批最大行数
    pub batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: SecretString::new("sqlite::memory:".to_string().into()),
            max_connections: 10,
            connect_timeout_ms: 10_000,
            query_timeout_ms: 3000,
            batch_size: 100,
        }
    }
}

/// 库存缓存配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    /// 键前缀，商品哈希键为 `{prefix}:{id}`，集合键为 `{prefix}:ids`
    pub key_prefix: String,
    /// 商品缓存记录的过期时间（秒）
    pub record_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "skill:product".to_string(),
            record_ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }
}

/// 冷缓存预热配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct WarmupConfig {
    /// 分布式锁的键
    pub lock_key: String,
    /// 锁的租约时间（毫秒）
    pub lock_ttl_ms: u64,
    /// 未抢到锁时的重试次数
    pub retry_times: u32,
    /// 重试间隔（毫秒）
    pub retry_interval_ms: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            lock_key: "lock:skill:product:list".to_string(),
            lock_ttl_ms: 1000,
            retry_times: 3,
            retry_interval_ms: 100,
        }
    }
}

impl WarmupConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// 持久化中继（消息队列）配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RelayConfig {
    /// 直连交换机名称
    pub exchange: String,
    /// 扣减库存队列名称
    pub queue: String,
    /// 路由键 / 绑定键
    pub routing_key: String,
    /// 消费端单次阻塞等待消息的时间（毫秒）
    pub poll_timeout_ms: u64,
    /// 消费端遇到队列故障后的退避时间（毫秒）
    pub error_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            exchange: "skill".to_string(),
            queue: "stock_deduct_queue".to_string(),
            routing_key: "skill.product".to_string(),
            poll_timeout_ms: 1000,
            error_backoff_ms: 500,
        }
    }
}

/// 预留流程配置
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ReservationConfig {
    /// 消息投递失败时是否回补缓存库存
    pub rollback_on_enqueue_failure: bool,
}

impl Config {
    /// 从TOML文件加载配置并校验
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置并校验
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| FlashSaleError::Configuration(e.to_string()))?;
        config.validate().map_err(FlashSaleError::Configuration)?;
        Ok(config)
    }

    /// 验证配置
    ///
    /// 检查所有超时、租约和键名是否在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = self.config_version {
            if version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if !(100..=30000).contains(&self.redis.connection_timeout_ms) {
            return Err("redis.connection_timeout_ms must be between 100 and 30000 ms".to_string());
        }

        if !(10..=60000).contains(&self.redis.command_timeout_ms) {
            return Err("redis.command_timeout_ms must be between 10 and 60000 ms".to_string());
        }

        if self.redis.mode == RedisMode::Sentinel && self.redis.sentinel.is_none() {
            return Err("redis.sentinel must be set when mode is 'sentinel'".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("database.max_connections cannot be zero".to_string());
        }

        if self.database.query_timeout_ms == 0 {
            return Err("database.query_timeout_ms cannot be zero".to_string());
        }

        if self.database.batch_size == 0 || self.database.batch_size > 10000 {
            return Err("database.batch_size must be between 1 and 10000".to_string());
        }

        if self.cache.key_prefix.is_empty() {
            return Err("cache.key_prefix cannot be empty".to_string());
        }

        if self.cache.record_ttl_secs == 0 || self.cache.record_ttl_secs > 86400 * 30 {
            return Err("cache.record_ttl_secs must be between 1 and 2592000".to_string());
        }

        if self.warmup.lock_key.is_empty() {
            return Err("warmup.lock_key cannot be empty".to_string());
        }

        if self.warmup.lock_ttl_ms == 0 || self.warmup.lock_ttl_ms > 60000 {
            return Err("warmup.lock_ttl_ms must be between 1 and 60000 ms".to_string());
        }

        if self.warmup.retry_times > 100 {
            return Err("warmup.retry_times cannot exceed 100".to_string());
        }

        if self.warmup.retry_interval_ms == 0 || self.warmup.retry_interval_ms > 10000 {
            return Err("warmup.retry_interval_ms must be between 1 and 10000 ms".to_string());
        }

        for (name, value) in [
            ("relay.exchange", &self.relay.exchange),
            ("relay.queue", &self.relay.queue),
            ("relay.routing_key", &self.relay.routing_key),
        ] {
            if value.is_empty() {
                return Err(format!("{} cannot be empty", name));
            }
        }

        if self.relay.poll_timeout_ms == 0 {
            return Err("relay.poll_timeout_ms cannot be zero".to_string());
        }

        Ok(())
    }

    /// Redis命令超时
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.redis.command_timeout_ms)
    }

    /// 数据库语句超时
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.database.query_timeout_ms)
    }
}
