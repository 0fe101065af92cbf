//! telemetry - 日志初始化
//!
//! 调用日志由 StatsObserver 通过 tracing 输出，这里只负责安装 subscriber。

use grpcutil_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 按配置初始化 tracing，`RUST_LOG` 优先于配置中的日志级别
pub fn init_telemetry(config: &TelemetryConfig) {
    match config.log_format {
        LogFormat::Text => init_tracing(&config.log_level),
        LogFormat::Json => init_tracing_json(&config.log_level),
    }
}

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}
