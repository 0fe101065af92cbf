//! grpcutil-errors - 统一错误处理
//!
//! 三类错误：启动期错误（SetupError）、单次调用的校验错误（CheckerError）、
//! 以及只会被记录而不会影响调用结果的观测错误（ObservabilityError）。

use std::sync::Arc;

use thiserror::Error;

/// 动态错误类型，checker 可以返回任意实现了 Error 的类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 启动期错误
///
/// 监听端口、读取证书、建立连接等一次性操作的失败。每个变体都描述了失败的阶段，
/// 原始错误作为 source 保留。
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("setting up port {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reading credentials file {path}: {source}")]
    Credentials {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuring tls: {0}")]
    Tls(#[source] tonic::transport::Error),

    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("dialing service {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("serving grpc: {0}")]
    Serve(#[source] tonic::transport::Error),

    #[error("compiling log bypass pattern: {0}")]
    InvalidBypass(#[from] regex::Error),
}

impl SetupError {
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    pub fn credentials(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Credentials {
            path: path.into(),
            source,
        }
    }
}

/// Result 类型别名
pub type SetupResult<T> = Result<T, SetupError>;

/// checker 校验失败
///
/// 包装（而不是替换）checker 返回的原始错误，调用方可以通过 `source()` 拿到根因。
#[derive(Debug, Error)]
#[error("checker failed: {}", reason(.source))]
pub struct CheckerError {
    #[source]
    source: BoxError,
}

impl CheckerError {
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// checker 返回的原始错误
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    pub fn into_inner(self) -> BoxError {
        self.source
    }

    /// 转换为 gRPC 状态码
    ///
    /// checker 自己返回了 Status 时沿用它的状态码，否则为 Unauthenticated。
    pub fn grpc_code(&self) -> tonic::Code {
        self.source
            .downcast_ref::<tonic::Status>()
            .map(|status| status.code())
            .unwrap_or(tonic::Code::Unauthenticated)
    }
}

fn reason(source: &BoxError) -> String {
    match source.downcast_ref::<tonic::Status>() {
        Some(status) => status.message().to_string(),
        None => source.to_string(),
    }
}

impl From<CheckerError> for tonic::Status {
    fn from(err: CheckerError) -> Self {
        let mut status = tonic::Status::new(err.grpc_code(), err.to_string());
        status.set_source(Arc::new(err));
        status
    }
}

/// 观测错误
///
/// 只在 handle 阶段出现，永远不会改变调用结果。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservabilityError {
    #[error("call scope missing from context")]
    MissingScope,
}
