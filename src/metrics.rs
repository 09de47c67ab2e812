//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了秒杀流水线的指标收集功能。

use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集预留、预热和持久化中继三条路径的运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 事件总数统计
    /// key: "component:op:result"
    pub events_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 操作耗时
    /// key: "component:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<Mutex<HashMap<String, (f64, u64)>>>,
    /// 中继消费者运行状态（0: 停止, 1: 运行）
    pub consumer_running: Arc<Mutex<HashMap<String, u8>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// 记录事件
    ///
    /// # 参数
    ///
    /// * `component` - 组件（reservation/warmup/relay）
    /// * `op` - 操作类型
    /// * `result` - 结果（reserved/out_of_stock/ack/requeue 等）
    pub fn record_event(&self, component: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "flash_sale_event", component, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}", component, op, result);
        *guard(&self.events_total).entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, component: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}", component, op);
        let mut map = guard(&self.operation_duration);
        let entry = map.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置消费者运行状态
    pub fn set_consumer_running(&self, queue: &str, running: bool) {
        guard(&self.consumer_running).insert(queue.to_string(), u8::from(running));
    }

    /// 读取某个事件计数
    pub fn event_count(&self, component: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}", component, op, result);
        guard(&self.events_total).get(&key).copied().unwrap_or(0)
    }
}

/// 获取指标字符串
///
/// 将所有指标按Prometheus文本格式返回，键按字典序排列
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let events: BTreeMap<String, u64> = guard(&metrics.events_total)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let durations: BTreeMap<String, (f64, u64)> = guard(&metrics.operation_duration)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let running: BTreeMap<String, u8> = guard(&metrics.consumer_running)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();

    let mut output = String::new();
    for (k, v) in &events {
        let parts: Vec<&str> = k.splitn(3, ':').collect();
        if parts.len() == 3 {
            output.push_str(&format!(
                "flash_sale_events_total{{component=\"{}\", operation=\"{}\", result=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], v
            ));
        }
    }
    for (k, (total, count)) in &durations {
        let parts: Vec<&str> = k.splitn(2, ':').collect();
        if parts.len() == 2 {
            output.push_str(&format!(
                "flash_sale_operation_duration_seconds_sum{{component=\"{}\", operation=\"{}\"}} {}\n",
                parts[0], parts[1], total
            ));
            output.push_str(&format!(
                "flash_sale_operation_duration_seconds_count{{component=\"{}\", operation=\"{}\"}} {}\n",
                parts[0], parts[1], count
            ));
        }
    }
    for (k, v) in &running {
        output.push_str(&format!(
            "flash_sale_consumer_running{{queue=\"{}\"}} {}\n",
            k, v
        ));
    }
    output
}
