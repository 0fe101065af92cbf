//! grpcutil-bootstrap - gRPC 服务启动骨架
//!
//! 启动期逻辑：证书加载、服务端和客户端连接的创建、日志初始化、优雅退出。

mod client;
mod credentials;
mod interceptor;
pub mod reflection;
mod runtime;
mod server;
mod shutdown;
mod starter;

pub use client::*;
pub use credentials::*;
pub use interceptor::*;
pub use runtime::*;
pub use server::*;
pub use shutdown::*;
pub use starter::*;
