//! grpcutil-middleware - gRPC 调用链中间件
//!
//! - [`AuthInterceptor`]：在 handler 之前运行 checker，支持一元和流式调用
//! - [`StatsObserver`]：记录每个调用的方法名、耗时和错误
//! - [`StatsLayer`]：把观察者接到 tonic 服务端的 tower 层

pub mod clock;
mod checker;
mod context;
mod interceptor;
mod layer;
mod observer;
mod stats;
mod stream;

pub use checker::*;
pub use context::*;
pub use interceptor::*;
pub use layer::*;
pub use observer::*;
pub use stats::*;
pub use stream::*;
