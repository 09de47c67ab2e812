//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! Redis连接提供者：按部署模式拼出连接地址，并在连接超时内建立连接管理器。

use crate::{
    config::{RedisConfig, SentinelConfig},
    error::{FlashSaleError, Result},
    utils::redact_connection_string,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use tokio::time::{timeout, Duration};
use tracing::info;

/// Redis连接提供者
///
/// 测试可以替换实现，把库存缓存接到预先准备好的连接上。
#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn connect_standalone(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)>;
    async fn connect_sentinel(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)>;
}

pub struct DefaultRedisProvider;

/// 单机模式地址；启用TLS时升级为 `rediss://`
pub fn standalone_url(config: &RedisConfig) -> String {
    let url = config.connection_string.expose_secret();
    if config.enable_tls && url.starts_with("redis://") {
        url.replacen("redis://", "rediss://", 1)
    } else {
        url.to_string()
    }
}

/// 哨兵模式地址：`redis+sentinel://[:password@]host:port[,host:port]/master`
pub fn sentinel_url(config: &RedisConfig, sentinel: &SentinelConfig) -> Result<String> {
    let nodes: Vec<&str> = sentinel
        .nodes
        .iter()
        .map(|n| {
            n.trim_start_matches("redis+sentinel://")
                .trim_start_matches("redis://")
                .trim_end_matches('/')
        })
        .filter(|n| !n.is_empty())
        .collect();
    if nodes.is_empty() {
        return Err(FlashSaleError::Configuration(
            "redis.sentinel.nodes cannot be empty".to_string(),
        ));
    }

    let auth = config
        .password
        .as_ref()
        .map(|p| format!(":{}@", p.expose_secret()))
        .unwrap_or_default();
    Ok(format!(
        "redis+sentinel://{}{}/{}",
        auth,
        nodes.join(","),
        sentinel.master_name
    ))
}

async fn open_manager(url: &str, connect_timeout_ms: u64) -> Result<(Client, ConnectionManager)> {
    let client = Client::open(url)?;
    match timeout(
        Duration::from_millis(connect_timeout_ms),
        client.get_connection_manager(),
    )
    .await
    {
        Ok(manager) => Ok((client, manager?)),
        Err(_) => Err(FlashSaleError::Timeout(format!(
            "Redis connection timed out after {}ms. Target: {}",
            connect_timeout_ms,
            redact_connection_string(url)
        ))),
    }
}

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn connect_standalone(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)> {
        open_manager(&standalone_url(config), config.connection_timeout_ms).await
    }

    async fn connect_sentinel(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)> {
        let sentinel = config.sentinel.as_ref().ok_or_else(|| {
            FlashSaleError::Configuration("Sentinel configuration is missing".to_string())
        })?;
        info!(
            "Connecting through sentinel master '{}' ({} nodes)",
            sentinel.master_name,
            sentinel.nodes.len()
        );
        open_manager(&sentinel_url(config, sentinel)?, config.connection_timeout_ms).await
    }
}
