//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 基于 Sea-ORM 的秒杀商品存储实现，支持 SQLite、MySQL 和 PostgreSQL。

use super::entity::{id_column, stock_column};
use super::{entity, receipt, ProductStore, StockDeduction};
use crate::config::DatabaseConfig;
use crate::error::{FlashSaleError, Result};
use crate::model::FlashSaleProduct;
use crate::utils::{redact_connection_string, with_deadline};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Schema, Set, TransactionTrait,
};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Sea-ORM 商品存储
#[derive(Debug, Clone)]
pub struct SeaOrmProductStore {
    db: DatabaseConnection,
    batch_size: usize,
    query_timeout: Duration,
}

impl SeaOrmProductStore {
    /// 根据配置建立连接并确保表结构存在
    #[instrument(skip(config), level = "info", name = "init_product_store")]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.expose_secret().to_string();
        info!(
            "Connecting product store: {}",
            redact_connection_string(&url)
        );

        let mut opt = ConnectOptions::new(url.clone());
        // 内存 SQLite 每个连接是独立数据库，只能使用单连接
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            config.max_connections
        };
        opt.max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        let store = Self::from_connection(
            db,
            config.batch_size,
            Duration::from_millis(config.query_timeout_ms),
        );
        store.ensure_schema().await?;
        Ok(store)
    }

    /// 使用已有连接创建存储
    pub fn from_connection(
        db: DatabaseConnection,
        batch_size: usize,
        query_timeout: Duration,
    ) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
            query_timeout,
        }
    }

    /// 创建 `skill_product` 和 `stock_deduct_receipt` 表（已存在则跳过）
    pub async fn ensure_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let mut products = schema.create_table_from_entity(entity::Entity);
        products.if_not_exists();
        self.db.execute(backend.build(&products)).await?;

        let mut receipts = schema.create_table_from_entity(receipt::Entity);
        receipts.if_not_exists();
        self.db.execute(backend.build(&receipts)).await?;

        debug!("skill_product and stock_deduct_receipt schema ensured");
        Ok(())
    }

    /// 底层连接
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl ProductStore for SeaOrmProductStore {
    #[instrument(skip(self), level = "debug")]
    async fn conditional_decrement(
        &self,
        product_id: u64,
        quantity: u32,
    ) -> Result<StockDeduction> {
        let product_id = id_column(product_id, "product_id")?;
        let quantity = stock_column(quantity, "quantity")?;
        with_deadline(self.query_timeout, "conditional decrement", async {
            decrement_on(&self.db, product_id, quantity).await
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn apply_reservation(
        &self,
        message_id: &str,
        product_id: u64,
        quantity: u32,
    ) -> Result<StockDeduction> {
        let product_id = id_column(product_id, "product_id")?;
        let quantity = stock_column(quantity, "quantity")?;
        with_deadline(self.query_timeout, "apply reservation", async {
            let txn = self.db.begin().await?;
            let seen = receipt::Entity::find_by_id(message_id.to_string())
                .one(&txn)
                .await?;
            if seen.is_some() {
                debug!("Message {} already applied", message_id);
                txn.rollback().await?;
                return Ok::<_, FlashSaleError>(StockDeduction::AlreadyApplied);
            }

            let deduction = decrement_on(&txn, product_id, quantity).await?;
            if deduction == StockDeduction::Applied {
                receipt::Entity::insert(receipt::ActiveModel {
                    message_id: Set(message_id.to_string()),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                })
                .exec_without_returning(&txn)
                .await?;
            }
            txn.commit().await?;
            Ok::<_, FlashSaleError>(deduction)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_in_stock(&self) -> Result<Vec<FlashSaleProduct>> {
        let models = with_deadline(self.query_timeout, "list in-stock products", async {
            entity::Entity::find()
                .filter(entity::Column::Num.gt(0))
                .order_by_asc(entity::Column::ProductId)
                .all(&self.db)
                .await
                .map_err(FlashSaleError::from)
        })
        .await?;
        debug!("Loaded {} in-stock products", models.len());
        Ok(models.into_iter().map(FlashSaleProduct::from).collect())
    }

    #[instrument(skip(self, products), level = "debug", fields(product_count = products.len()))]
    async fn bulk_create(&self, products: &[FlashSaleProduct]) -> Result<()> {
        if products.is_empty() {
            return Ok(());
        }

        with_deadline(self.query_timeout, "bulk create products", async {
            let txn = self.db.begin().await?;
            for chunk in products.chunks(self.batch_size) {
                let models = chunk
                    .iter()
                    .map(entity::ActiveModel::try_from)
                    .collect::<Result<Vec<_>>>()?;
                entity::Entity::insert_many(models).exec(&txn).await?;
            }
            txn.commit().await?;
            Ok::<(), FlashSaleError>(())
        })
        .await?;

        info!(
            "Created {} flash-sale products in batches of {}",
            products.len(),
            self.batch_size
        );
        Ok(())
    }
}

/// 在给定连接或事务上执行 `UPDATE ... SET num = num - ? WHERE product_id = ? AND num >= ?`
async fn decrement_on<C: ConnectionTrait>(
    conn: &C,
    product_id: i64,
    quantity: i32,
) -> Result<StockDeduction> {
    let result = entity::Entity::update_many()
        .col_expr(
            entity::Column::Num,
            Expr::col(entity::Column::Num).sub(quantity),
        )
        .filter(entity::Column::ProductId.eq(product_id))
        .filter(entity::Column::Num.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        debug!("No row updated for product {}", product_id);
        Ok(StockDeduction::InsufficientStock)
    } else {
        Ok(StockDeduction::Applied)
    }
}
