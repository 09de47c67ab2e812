//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 开售、列表和下单命令的实现。

use crate::cli::{connect, ConfigArgs, InitSaleArgs, ReserveArgs};
use crate::model::FlashSaleProduct;
use crate::reservation::PurchaseReply;
use anyhow::{Context, Result};

/// 生成演示商品
pub fn demo_products(args: &InitSaleArgs) -> Vec<FlashSaleProduct> {
    (0..args.count)
        .map(|i| {
            let product_id = args.start_id + i;
            FlashSaleProduct::new(
                product_id,
                args.owner_id,
                format!("{} #{}", args.title, product_id),
                args.price,
                args.stock,
            )
        })
        .collect()
}

pub async fn init_sale(args: &InitSaleArgs) -> Result<()> {
    let runtime = connect(&args.config).await?;
    let products = demo_products(args);

    let on_sale = runtime
        .service()
        .init_sale(&products)
        .await
        .context("Failed to initialise flash sale")?;

    println!(
        "✅ Created {} products ({} on sale, {} units each)",
        products.len(),
        on_sale,
        args.stock
    );
    runtime.shutdown().await?;
    Ok(())
}

pub async fn list(args: &ConfigArgs) -> Result<()> {
    let runtime = connect(&args.config).await?;
    let records = runtime
        .service()
        .list_products()
        .await
        .context("Failed to list flash-sale products")?;

    println!("=== Flash Sale Products ===\n");
    if records.is_empty() {
        println!("No products on sale.");
    }
    for record in &records {
        println!(
            "  {:>8}  {:<32} price={:<10.2} stock={:<6} owner={}",
            record.product_id, record.title, record.price, record.stock, record.owner_id
        );
    }
    runtime.shutdown().await?;
    Ok(())
}

pub async fn reserve(args: &ReserveArgs) -> Result<()> {
    let runtime = connect(&args.config).await?;
    let result = runtime.service().reserve(args.product_id).await;
    if let Err(e) = &result {
        tracing::warn!("Reservation for product {} failed: {}", args.product_id, e);
    }

    let reply = PurchaseReply::from_result(&result);
    println!(
        "{}",
        serde_json::json!({ "product_id": args.product_id, "reply": reply })
    );
    runtime.shutdown().await?;
    Ok(())
}
