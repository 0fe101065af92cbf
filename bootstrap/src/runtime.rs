//! 服务运行时

use grpcutil_config::GrpcConfig;
use grpcutil_telemetry::init_telemetry;
use tracing::{error, info};

/// 初始化服务运行时
pub fn init_runtime(config: &GrpcConfig) {
    init_telemetry(&config.telemetry);

    info!(
        port = %config.port,
        secure = config.secure,
        log_bypass = config.log_bypass.as_deref().unwrap_or(""),
        merge_strategy = ?config.merge_strategy,
        "Runtime initialized"
    );
}

/// 等待 Ctrl+C 或 SIGTERM
///
/// 信号处理器安装失败时只记录错误，对应的分支永不完成。
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
