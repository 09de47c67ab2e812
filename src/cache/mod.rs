//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了库存快速缓存的接口。
//!
//! 每个秒杀商品以哈希结构保存在 `{prefix}:{product_id}` 下，
//! 所有可售商品ID保存在集合 `{prefix}:ids` 中。
//! 库存的“检查+扣减”必须在一次原子脚本调用中完成，不允许拆成读后写两次调用。

use crate::error::Result;
use crate::model::CacheRecord;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

/// 原子扣减脚本在库存不足时返回的哨兵值
pub const INSUFFICIENT_STOCK_SENTINEL: i64 = -1;

/// 原子扣减脚本
///
/// 读取 `stock` 字段，库存充足则扣减并返回新库存，否则返回 -1 且不修改数据。
pub const DECREMENT_STOCK_SCRIPT: &str = r#"
local stock = tonumber(redis.call('HGET', KEYS[1], 'stock'))
local quantity = tonumber(ARGV[1])
if not stock or stock < quantity then
    return -1
end
redis.call('HINCRBY', KEYS[1], 'stock', -quantity)
return stock - quantity
"#;

/// 回补脚本，仅在记录仍存在时增加库存
pub const RESTORE_STOCK_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
return redis.call('HINCRBY', KEYS[1], 'stock', ARGV[1])
"#;

/// 冷缓存填充脚本
///
/// 仅当可售集合 `KEYS[1]` 为空时写入整批记录，否则不做任何修改并返回0。
/// `KEYS[2..]` 为商品哈希键；`ARGV[1]` 为过期秒数，`ARGV[2]` 为每条记录的字段参数个数 n，
/// 之后每条记录依次为商品ID和 n 个字段名/值参数。
pub const POPULATE_IF_COLD_SCRIPT: &str = r#"
if redis.call('SCARD', KEYS[1]) > 0 then
    return 0
end
local ttl = tonumber(ARGV[1])
local field_args = tonumber(ARGV[2])
for i = 2, #KEYS do
    local base = 2 + (i - 2) * (field_args + 1)
    local fields = {}
    for j = base + 2, base + 1 + field_args do
        fields[#fields + 1] = ARGV[j]
    end
    redis.call('HSET', KEYS[i], unpack(fields))
    redis.call('EXPIRE', KEYS[i], ttl)
    redis.call('SADD', KEYS[1], ARGV[base + 1])
end
return 1
"#;

/// 缓存键命名
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// 商品哈希键
    pub fn product(&self, product_id: u64) -> String {
        format!("{}:{}", self.prefix, product_id)
    }

    /// 可售商品ID集合键
    pub fn membership(&self) -> String {
        format!("{}:ids", self.prefix)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("skill:product")
    }
}

/// 原子扣减结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// 扣减成功，携带扣减后的库存
    Remaining(u64),
    /// 库存不足（或记录不存在），未做任何修改
    Insufficient,
}

impl DecrementOutcome {
    /// 解析脚本返回值
    pub fn from_script_result(value: i64) -> Self {
        if value < 0 {
            DecrementOutcome::Insufficient
        } else {
            DecrementOutcome::Remaining(value as u64)
        }
    }
}

/// 库存快速缓存
#[async_trait]
pub trait StockCache: Send + Sync {
    /// 覆盖写入单个商品记录并刷新过期时间
    async fn populate_product(&self, record: &CacheRecord, ttl: Duration) -> Result<()>;

    /// 原子地写入一批商品记录、过期时间和集合成员
    ///
    /// 整批要么全部生效，要么整体失败返回错误。
    async fn populate(&self, records: &[CacheRecord], ttl: Duration) -> Result<()>;

    /// 仅当可售集合为空时原子地写入一批记录、过期时间和集合成员
    ///
    /// 检查与写入在同一次原子调用中完成。返回 `false` 表示缓存已被其他调用者填充，
    /// 本次没有写入任何数据，已被扣减过的库存不会被覆盖。
    async fn populate_if_cold(&self, records: &[CacheRecord], ttl: Duration) -> Result<bool>;

    /// 幂等地加入可售集合
    async fn add_to_membership(&self, product_ids: &[u64]) -> Result<()>;

    /// 读取可售集合
    async fn membership(&self) -> Result<BTreeSet<u64>>;

    /// 判断商品是否在可售集合中
    async fn is_member(&self, product_id: u64) -> Result<bool>;

    /// 读取单个商品记录
    async fn record(&self, product_id: u64) -> Result<Option<CacheRecord>>;

    /// 批量读取商品记录，跳过不存在的记录
    async fn records(&self, product_ids: &[u64]) -> Result<Vec<CacheRecord>> {
        let mut records = Vec::with_capacity(product_ids.len());
        for id in product_ids {
            if let Some(record) = self.record(*id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// 原子脚本扣减库存
    async fn decrement_stock(&self, product_id: u64, quantity: u32) -> Result<DecrementOutcome>;

    /// 补偿性回补库存，记录不存在时返回 `Ok(false)`
    async fn restore_stock(&self, product_id: u64, quantity: u32) -> Result<bool>;
}
