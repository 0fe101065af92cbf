//! 服务启动器
//!
//! 提供统一的服务启动模式

use grpcutil_config::{CliArgs, GrpcConfig};
use grpcutil_errors::BoxError;
use tonic::service::Routes;
use tracing::info;

use crate::runtime::init_runtime;
use crate::server::{ServerFactory, ServerOption};
use crate::shutdown::ShutdownController;

/// 运行 gRPC 服务
///
/// 1. 加载配置（`grpc.toml` + 环境变量），叠加命令行参数
/// 2. 初始化日志
/// 3. 调用闭包构建路由
/// 4. 创建服务端并运行，收到 Ctrl+C / SIGTERM 后优雅退出
///
/// # 示例
///
/// ```ignore
/// use clap::Parser;
/// use grpcutil_bootstrap::run;
///
/// #[tokio::main]
/// async fn main() -> Result<(), grpcutil_errors::BoxError> {
///     run(&CliArgs::parse(), Vec::new(), |_config| {
///         Routes::new(GreeterServer::new(MyGreeter::default()))
///     })
///     .await
/// }
/// ```
pub async fn run<F>(args: &CliArgs, opts: Vec<ServerOption>, build_routes: F) -> Result<(), BoxError>
where
    F: FnOnce(&GrpcConfig) -> Routes,
{
    let config = GrpcConfig::load(&args.config_dir)?.with_cli(args);
    init_runtime(&config);

    let routes = build_routes(&config);
    let server = ServerFactory::new(config).create_server(opts).await?;

    let shutdown = ShutdownController::new();
    let signal_task = shutdown.trigger_on_signal();

    server.serve_with_shutdown(routes, shutdown.wait()).await?;

    signal_task.abort();
    info!("Service stopped");

    Ok(())
}
