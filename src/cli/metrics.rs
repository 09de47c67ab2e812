//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了指标查询命令的实现。

use crate::metrics::get_metrics_string;
use anyhow::Result;

pub fn execute() -> Result<()> {
    let output = get_metrics_string();
    if output.is_empty() {
        println!("No metrics recorded in this process.");
    } else {
        print!("{}", output);
    }
    Ok(())
}
