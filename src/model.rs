//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀商品、缓存记录和库存扣减消息的数据模型。

use crate::error::{FlashSaleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 参与秒杀的商品
///
/// `remaining_stock` 只能通过条件扣减修改，不会被整体覆盖写入。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashSaleProduct {
    /// 持久化主键，新建时为0
    pub id: u64,
    /// 业务商品ID，作为对外键
    pub product_id: u64,
    pub owner_id: u64,
    pub title: String,
    pub unit_price: f64,
    pub remaining_stock: u32,
    pub buyer_id: Option<u64>,
    pub buyer_name: Option<String>,
}

impl FlashSaleProduct {
    /// 创建一个尚未持久化的秒杀商品
    pub fn new(
        product_id: u64,
        owner_id: u64,
        title: impl Into<String>,
        unit_price: f64,
        remaining_stock: u32,
    ) -> Self {
        Self {
            id: 0,
            product_id,
            owner_id,
            title: title.into(),
            unit_price,
            remaining_stock,
            buyer_id: None,
            buyer_name: None,
        }
    }
}

/// 缓存中的商品哈希记录
///
/// 字段名与缓存哈希字段一一对应：`stock`、`price`、`product_id`、`title`、`boss_id`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub stock: i64,
    pub price: f64,
    pub product_id: u64,
    pub title: String,
    #[serde(rename = "boss_id")]
    pub owner_id: u64,
}

pub const FIELD_STOCK: &str = "stock";
pub const FIELD_PRICE: &str = "price";
pub const FIELD_PRODUCT_ID: &str = "product_id";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_OWNER_ID: &str = "boss_id";

impl CacheRecord {
    /// 转换为哈希字段列表
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_STOCK, self.stock.to_string()),
            (FIELD_PRICE, self.price.to_string()),
            (FIELD_PRODUCT_ID, self.product_id.to_string()),
            (FIELD_TITLE, self.title.clone()),
            (FIELD_OWNER_ID, self.owner_id.to_string()),
        ]
    }

    /// 从哈希字段解析记录
    ///
    /// 空哈希（键不存在）返回 `Ok(None)`，字段缺失或无法解析返回错误。
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| FlashSaleError::CacheRecord(format!("missing field '{}'", name)))
        }

        fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
            value.parse::<T>().map_err(|_| {
                FlashSaleError::CacheRecord(format!("invalid value '{}' for field '{}'", value, name))
            })
        }

        Ok(Some(Self {
            stock: parse(field(fields, FIELD_STOCK)?, FIELD_STOCK)?,
            price: parse(field(fields, FIELD_PRICE)?, FIELD_PRICE)?,
            product_id: parse(field(fields, FIELD_PRODUCT_ID)?, FIELD_PRODUCT_ID)?,
            title: field(fields, FIELD_TITLE)?.to_string(),
            owner_id: parse(field(fields, FIELD_OWNER_ID)?, FIELD_OWNER_ID)?,
        }))
    }
}

impl From<&FlashSaleProduct> for CacheRecord {
    fn from(product: &FlashSaleProduct) -> Self {
        Self {
            stock: i64::from(product.remaining_stock),
            price: product.unit_price,
            product_id: product.product_id,
            title: product.title.clone(),
            owner_id: product.owner_id,
        }
    }
}

/// 从缓存快路径传递到持久化路径的预留消息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMessage {
    pub product_id: u64,
}

impl ReservationMessage {
    pub fn new(product_id: u64) -> Self {
        Self { product_id }
    }

    /// 编码为JSON消息体
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 解析消息体
    ///
    /// 接受 `{"product_id": N}`、JSON数字 `N` 或十进制字符串。
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if let Ok(message) = serde_json::from_slice::<ReservationMessage>(payload) {
            return Ok(message);
        }
        if let Ok(product_id) = serde_json::from_slice::<u64>(payload) {
            return Ok(Self { product_id });
        }
        let text = std::str::from_utf8(payload)
            .map_err(|e| FlashSaleError::Broker(format!("payload is not UTF-8: {}", e)))?;
        text.trim()
            .parse::<u64>()
            .map(Self::new)
            .map_err(|_| FlashSaleError::Broker(format!("malformed reservation payload: {:?}", text)))
    }
}
