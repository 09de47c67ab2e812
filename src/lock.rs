//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了短租约分布式互斥锁的接口。
//!
//! 锁只用于保护冷缓存回源路径，稳态的库存扣减由缓存脚本保证原子性，不经过此锁。

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// 校验持有者后删除锁的脚本
pub const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// 锁持有者令牌，每次加锁尝试生成一个新的随机值
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LockToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({})", self.0)
    }
}

/// 分布式互斥锁
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 非阻塞加锁，键已存在时返回 `Ok(false)`
    async fn try_acquire(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool>;

    /// 仅当锁值等于 `token` 时删除锁，返回是否删除
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool>;
}
