//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxstock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Log filter used when RUST_LOG is not set")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "init-sale", about = "Create demo flash-sale products and populate the cache")]
    InitSale(InitSaleArgs),

    #[command(name = "list", about = "List products currently on sale")]
    List(ConfigArgs),

    #[command(name = "reserve", about = "Reserve one unit of a product")]
    Reserve(ReserveArgs),

    #[command(name = "consume", about = "Run the stock deduct consumer until Ctrl-C")]
    Consume(ConfigArgs),

    #[command(name = "metrics", about = "Print pipeline metrics")]
    Metrics,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[arg(short, long, help = "Path to the TOML configuration file")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct InitSaleArgs {
    #[arg(short, long, help = "Path to the TOML configuration file")]
    pub config: PathBuf,

    #[arg(long, default_value_t = 10, help = "Number of products to create")]
    pub count: u64,

    #[arg(long, default_value_t = 1, help = "First product id")]
    pub start_id: u64,

    #[arg(long, default_value_t = 10, help = "Stock of each product")]
    pub stock: u32,

    #[arg(long, default_value_t = 99.0, help = "Unit price")]
    pub price: f64,

    #[arg(long, default_value_t = 1, help = "Owner (seller) id")]
    pub owner_id: u64,

    #[arg(long, default_value = "flash sale item", help = "Title prefix")]
    pub title: String,
}

#[derive(Parser, Debug)]
pub struct ReserveArgs {
    #[arg(short, long, help = "Path to the TOML configuration file")]
    pub config: PathBuf,

    #[arg(short, long, help = "Product id to reserve")]
    pub product_id: u64,
}

mod consume;
mod metrics;
mod sale;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("oxstock", cli.log.as_deref());

    match &cli.command {
        Commands::InitSale(args) => sale::init_sale(args).await,
        Commands::List(args) => sale::list(args).await,
        Commands::Reserve(args) => sale::reserve(args).await,
        Commands::Consume(args) => consume::execute(args).await,
        Commands::Metrics => metrics::execute(),
    }
}

pub(crate) async fn connect(config: &std::path::Path) -> Result<crate::runtime::FlashSaleRuntime> {
    use anyhow::Context;

    let config = crate::config::Config::from_file(config)
        .with_context(|| format!("Failed to load configuration from {}", config.display()))?;
    crate::runtime::FlashSaleRuntime::connect(config)
        .await
        .context("Failed to connect flash-sale backends")
}
