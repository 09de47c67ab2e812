//! oxstock - 秒杀库存预留流水线
//!
//! 基于Redis脚本的原子库存预留、分布式锁保护的冷缓存预热，
//! 以及至少一次投递的异步库存持久化。

#![doc(html_root_url = "https://docs.rs/oxstock/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod relay;
pub mod reservation;
pub mod runtime;
pub mod service;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod utils;

// Re-export commonly used items
pub use config::Config;
pub use error::{FlashSaleError, Result};
pub use reservation::{PurchaseReply, ReservationEngine, ReservationOutcome};
pub use runtime::FlashSaleRuntime;
pub use service::SkillService;
pub use sync::warmup::{CacheWarmer, WarmupOutcome};

/// oxstock 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
