//! gRPC Demo - 反射服务入口
//!
//! 使用 grpcutil-bootstrap 统一启动模式。设置 `GRPC_DEMO_TOKEN` 后，
//! 所有调用都需要 `authorization: Bearer <token>`。

use clap::Parser;
use grpcutil_bootstrap::reflection::build_reflection;
use grpcutil_bootstrap::{bearer_interceptor, run};
use grpcutil_config::CliArgs;
use tonic::service::Routes;
use tonic::service::interceptor::InterceptedService;
use tracing::warn;

const ENV_KEY_DEMO_TOKEN: &str = "GRPC_DEMO_TOKEN";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let reflection = build_reflection(&[])?;
    let token = std::env::var(ENV_KEY_DEMO_TOKEN).ok().filter(|t| !t.is_empty());

    run(&args, Vec::new(), move |_config| match token {
        Some(token) => Routes::new(InterceptedService::new(reflection, bearer_interceptor(token))),
        None => {
            warn!("{} not set, calls are not authenticated", ENV_KEY_DEMO_TOKEN);
            Routes::new(reflection)
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))
}
