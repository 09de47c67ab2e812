//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 持久化中继：把缓存快路径上的成功预留异步、至少一次地同步到持久化存储。

pub mod broker;
pub mod consumer;
pub mod memory_broker;
pub mod producer;
pub mod redis_broker;

pub use self::broker::{Delivery, Envelope, MessageBroker, QueueTopology};
pub use self::consumer::{AckDecision, ConsumeOutcome, StockDeductConsumer};
pub use self::memory_broker::MemoryBroker;
pub use self::producer::RelayProducer;
pub use self::redis_broker::RedisBroker;
