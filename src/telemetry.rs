//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志和链路追踪的初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// 默认日志过滤规则
pub const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn,sea_orm=warn";

/// 初始化 tracing 订阅者
///
/// 组合三层：`EnvFilter`（优先读取 `RUST_LOG`，否则使用 `filter`）、
/// 控制台格式化输出，以及 OpenTelemetry span 层。
/// 重复调用时保留第一次设置的全局订阅者。
///
/// # 参数
///
/// * `service_name` - 服务名称，用作 tracer 名
/// * `filter` - 未设置 `RUST_LOG` 时使用的过滤规则
pub fn init_tracing(service_name: &str, filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));

    // 未配置导出器时 provider 为 no-op，span 仍然会传播上下文
    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    let _ = tracing::subscriber::set_global_default(subscriber);
}
