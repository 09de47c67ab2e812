//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 持久化消费者命令的实现。

use crate::cli::{connect, ConfigArgs};
use anyhow::{Context, Result};
use tracing::info;

pub async fn execute(args: &ConfigArgs) -> Result<()> {
    let runtime = connect(&args.config).await?;
    runtime
        .spawn_consumer()
        .await
        .context("Failed to start stock deduct consumer")?;

    println!(
        "Consuming from '{}', press Ctrl-C to stop...",
        runtime.config().relay.queue
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Interrupt received, draining consumer");
    runtime.shutdown().await?;
    println!("✅ Consumer stopped.");
    Ok(())
}
