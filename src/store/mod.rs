//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久化存储适配层。
//!
//! 这是一个同步、强一致的窄接口，只暴露条件扣减、在售商品列表和批量创建三个操作，
//! 不涉及任何缓存逻辑。

pub mod entity;
pub mod memory;
pub mod receipt;
pub mod sql;

use crate::error::Result;
use crate::model::FlashSaleProduct;
use async_trait::async_trait;

pub use self::memory::MemoryProductStore;
pub use self::sql::SeaOrmProductStore;

/// 条件扣减结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDeduction {
    /// 扣减已生效
    Applied,
    /// 剩余库存不足或商品不存在，未做修改
    InsufficientStock,
    /// 同一消息此前已经扣减过，本次未做修改
    AlreadyApplied,
}

/// 秒杀商品持久化存储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// 仅当 `remaining_stock >= quantity` 时在同一条语句中扣减库存
    async fn conditional_decrement(&self, product_id: u64, quantity: u32)
        -> Result<StockDeduction>;

    /// 按消息ID幂等地条件扣减
    ///
    /// 扣减与消息回执在同一事务中写入；同一 `message_id` 再次到达时返回
    /// [`StockDeduction::AlreadyApplied`]，不会重复扣减。
    async fn apply_reservation(
        &self,
        message_id: &str,
        product_id: u64,
        quantity: u32,
    ) -> Result<StockDeduction>;

    /// 返回所有 `remaining_stock > 0` 的商品
    async fn list_in_stock(&self) -> Result<Vec<FlashSaleProduct>>;

    /// 分批创建商品，幂等性由调用方保证
    async fn bulk_create(&self, products: &[FlashSaleProduct]) -> Result<()>;
}
