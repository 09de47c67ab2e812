//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了快速缓存和分布式锁的后端实现，包括Redis后端和内存后端。

pub mod memory;
pub mod redis;
pub mod redis_provider;

pub use self::memory::{MemoryLock, MemoryStockCache};
pub use self::redis::RedisBackend;
