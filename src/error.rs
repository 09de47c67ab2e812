//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀库存系统的错误类型和重试分类。
//!
//! 业务拒绝（商品不存在、库存不足）不是错误，见 [`crate::reservation::ReservationOutcome`]。

use thiserror::Error;

/// 秒杀系统错误类型枚举
#[derive(Error, Debug)]
pub enum FlashSaleError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis错误
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// 缓存数据格式错误（哈希字段缺失或无法解析）
    #[error("Cache record error: {0}")]
    CacheRecord(String),

    /// Sea-ORM数据库错误
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// 消息队列错误
    #[error("Broker error: {0}")]
    Broker(String),

    /// 消息无法路由到任何队列
    #[error("Message to exchange '{exchange}' with routing key '{routing_key}' is unroutable")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    /// 缓存扣减成功但消息投递失败，库存已在缓存中预留但尚未持久化
    #[error("Reservation for product {product_id} was not handed off for persistence: {reason}")]
    EnqueueFailed { product_id: u64, reason: String },

    /// 冷缓存预热未完成，调用方应稍后重试
    #[error("Temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    /// 数值超出持久化列的取值范围
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

impl FlashSaleError {
    /// 判断错误是否可以安全重试
    ///
    /// 后端连接失败、超时和冷缓存未就绪属于瞬时故障；
    /// 配置错误、数据格式错误以及缓存已扣减后的投递失败不应自动重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            FlashSaleError::Redis(e) => {
                e.is_timeout()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_io_error()
            }
            FlashSaleError::Database(e) => matches!(
                e,
                sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_)
            ),
            FlashSaleError::Broker(_)
            | FlashSaleError::Timeout(_)
            | FlashSaleError::TemporarilyUnavailable(_)
            | FlashSaleError::Io(_) => true,
            FlashSaleError::Configuration(_)
            | FlashSaleError::Serialization(_)
            | FlashSaleError::CacheRecord(_)
            | FlashSaleError::OutOfRange(_)
            | FlashSaleError::Unroutable { .. }
            | FlashSaleError::EnqueueFailed { .. }
            | FlashSaleError::Shutdown(_) => false,
        }
    }
}

/// 操作结果类型别名
pub type Result<T> = std::result::Result<T, FlashSaleError>;
