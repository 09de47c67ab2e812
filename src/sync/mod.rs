//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久化存储到快速缓存的同步机制。

pub mod warmup;

pub use self::warmup::{CacheWarmer, WarmupOutcome};
