//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! `skill_product` 表的 Sea-ORM 实体定义。

use crate::error::{FlashSaleError, Result as FsResult};
use crate::model::FlashSaleProduct;
use sea_orm::entity::prelude::*;
use sea_orm::Set;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "skill_product")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub product_id: i64,
    pub boss_id: i64,
    pub title: String,
    pub price: f64,
    pub num: i32,
    pub custom_id: Option<i64>,
    pub custom_name: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// 无符号ID转为 `BIGINT` 列值
pub fn id_column(value: u64, field: &str) -> FsResult<i64> {
    i64::try_from(value).map_err(|_| {
        FlashSaleError::OutOfRange(format!("{} {} exceeds the BIGINT column", field, value))
    })
}

/// 库存数量转为 `INT` 列值
pub fn stock_column(value: u32, field: &str) -> FsResult<i32> {
    i32::try_from(value).map_err(|_| {
        FlashSaleError::OutOfRange(format!("{} {} exceeds the INT column", field, value))
    })
}

impl From<Model> for FlashSaleProduct {
    fn from(model: Model) -> Self {
        Self {
            id: model.id.max(0) as u64,
            product_id: model.product_id.max(0) as u64,
            owner_id: model.boss_id.max(0) as u64,
            title: model.title,
            unit_price: model.price,
            remaining_stock: model.num.max(0) as u32,
            buyer_id: model.custom_id.map(|id| id.max(0) as u64),
            buyer_name: model.custom_name,
        }
    }
}

impl TryFrom<&FlashSaleProduct> for ActiveModel {
    type Error = FlashSaleError;

    fn try_from(product: &FlashSaleProduct) -> FsResult<Self> {
        Ok(Self {
            id: sea_orm::ActiveValue::NotSet,
            product_id: Set(id_column(product.product_id, "product_id")?),
            boss_id: Set(id_column(product.owner_id, "owner_id")?),
            title: Set(product.title.clone()),
            price: Set(product.unit_price),
            num: Set(stock_column(product.remaining_stock, "remaining_stock")?),
            custom_id: Set(product
                .buyer_id
                .map(|id| id_column(id, "buyer_id"))
                .transpose()?),
            custom_name: Set(product.buyer_name.clone()),
        })
    }
}
