//! gRPC 服务端创建
//!
//! [`ServerFactory`] 把监听端口、证书、调用观察者和调用方选项组合成 [`ServerSet`]。
//! 是否启用 TLS 只在创建时根据 [`GrpcConfig::secure`] 决定一次。

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use grpcutil_config::{GrpcConfig, MergeStrategy};
use grpcutil_errors::{SetupError, SetupResult};
use grpcutil_middleware::{CallObserver, StatsLayer, StatsObserver};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Routes;
use tonic::transport::Server;
use tower::layer::util::{Identity, Stack};
use tracing::{debug, info};

use crate::credentials::server_tls_config;

/// 挂了调用观察层的 tonic Server
pub type GrpcServer = Server<Stack<StatsLayer, Identity>>;

/// 服务端选项
#[derive(Clone)]
pub enum ServerOption {
    /// 注册调用观察者，按注册顺序收到事件
    Observer(Arc<dyn CallObserver>),
    /// 单个请求的超时
    Timeout(Duration),
    /// 每个连接的并发请求上限
    ConcurrencyLimit(usize),
    MaxConcurrentStreams(u32),
    Http2KeepaliveInterval(Duration),
    /// 同时接受 HTTP/1.1（grpc-web）
    AcceptHttp1(bool),
}

impl ServerOption {
    pub fn observer(observer: impl CallObserver) -> Self {
        Self::Observer(Arc::new(observer))
    }
}

impl fmt::Debug for ServerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observer(_) => f.write_str("Observer(..)"),
            Self::Timeout(d) => f.debug_tuple("Timeout").field(d).finish(),
            Self::ConcurrencyLimit(n) => f.debug_tuple("ConcurrencyLimit").field(n).finish(),
            Self::MaxConcurrentStreams(n) => f.debug_tuple("MaxConcurrentStreams").field(n).finish(),
            Self::Http2KeepaliveInterval(d) => {
                f.debug_tuple("Http2KeepaliveInterval").field(d).finish()
            }
            Self::AcceptHttp1(b) => f.debug_tuple("AcceptHttp1").field(b).finish(),
        }
    }
}

/// 默认选项：带 bypass 过滤的调用日志
pub fn base_server_opts(config: &GrpcConfig) -> SetupResult<Vec<ServerOption>> {
    let stats = StatsObserver::from_pattern(config.log_bypass.as_deref())?;
    Ok(vec![ServerOption::observer(stats)])
}

/// 合并默认选项和调用方选项
///
/// `Append` 总是保留默认选项；`Override` 在调用方给了选项时整体替换默认值。
pub fn make_server_opts(
    defaults: Vec<ServerOption>,
    opts: Vec<ServerOption>,
    strategy: MergeStrategy,
) -> Vec<ServerOption> {
    match strategy {
        MergeStrategy::Append => defaults.into_iter().chain(opts).collect(),
        MergeStrategy::Override if opts.is_empty() => defaults,
        MergeStrategy::Override => opts,
    }
}

/// 端口规范化：`50051` → `0.0.0.0:50051`，`:50051` → `0.0.0.0:50051`
///
/// 只监听 IPv4。关闭了 IPv6 的主机上 `[::]` 会绑定失败；需要 IPv6 时
/// 传完整地址，例如 `[::]:50051`，原样使用。
pub fn listen_addr(port: &str) -> String {
    if !port.contains(':') {
        format!("0.0.0.0:{port}")
    } else if let Some(rest) = port.strip_prefix(':') {
        format!("0.0.0.0:{rest}")
    } else {
        port.to_string()
    }
}

/// gRPC 服务端和它的监听器
pub struct ServerSet {
    server: GrpcServer,
    listener: TcpListener,
    local_addr: SocketAddr,
    secure: bool,
}

impl ServerSet {
    pub fn server(&mut self) -> &mut GrpcServer {
        &mut self.server
    }

    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    /// 实际绑定的地址，端口为 0 时由系统分配
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 是否启用 TLS
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn into_parts(self) -> (GrpcServer, TcpListener) {
        (self.server, self.listener)
    }

    /// 运行服务直到监听器关闭或出现致命错误
    pub async fn serve(self, routes: Routes) -> SetupResult<()> {
        self.serve_with_shutdown(routes, std::future::pending()).await
    }

    /// 运行服务，`signal` 完成时优雅退出
    pub async fn serve_with_shutdown<F>(mut self, routes: Routes, signal: F) -> SetupResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(addr = %self.local_addr, secure = self.secure, "gRPC server starting");

        self.server
            .add_routes(routes)
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), signal)
            .await
            .map_err(SetupError::Serve)?;

        info!(addr = %self.local_addr, "gRPC server stopped");
        Ok(())
    }
}

impl fmt::Debug for ServerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSet")
            .field("local_addr", &self.local_addr)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

/// 服务端工厂
#[derive(Debug, Clone)]
pub struct ServerFactory {
    config: GrpcConfig,
}

impl ServerFactory {
    pub fn new(config: GrpcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GrpcConfig {
        &self.config
    }

    /// 在配置的端口上创建服务端
    pub async fn create_server(&self, opts: Vec<ServerOption>) -> SetupResult<ServerSet> {
        self.create_server_on(&self.config.port, opts).await
    }

    /// 在指定端口上创建服务端，失败时不返回任何句柄
    pub async fn create_server_on(
        &self,
        port: &str,
        opts: Vec<ServerOption>,
    ) -> SetupResult<ServerSet> {
        let opts = make_server_opts(
            base_server_opts(&self.config)?,
            opts,
            self.config.merge_strategy,
        );

        let addr = listen_addr(port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| SetupError::bind(addr.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SetupError::bind(addr.clone(), e))?;

        let mut builder = Server::builder();
        if self.config.secure {
            debug!("Creating secured server");
            builder = builder
                .tls_config(server_tls_config(&self.config.tls)?)
                .map_err(SetupError::Tls)?;
        } else {
            debug!("Creating internal server");
        }

        let (builder, layer) = apply(builder, opts);
        debug!(%local_addr, observers = layer.len(), "Server configured");

        Ok(ServerSet {
            server: builder.layer(layer),
            listener,
            local_addr,
            secure: self.config.secure,
        })
    }
}

/// 按配置创建服务端
pub async fn create_server(config: &GrpcConfig, opts: Vec<ServerOption>) -> SetupResult<ServerSet> {
    ServerFactory::new(config.clone()).create_server(opts).await
}

fn apply(mut builder: Server, opts: Vec<ServerOption>) -> (Server, StatsLayer) {
    let mut observers = Vec::new();
    for opt in opts {
        builder = match opt {
            ServerOption::Observer(observer) => {
                observers.push(observer);
                builder
            }
            ServerOption::Timeout(timeout) => builder.timeout(timeout),
            ServerOption::ConcurrencyLimit(limit) => builder.concurrency_limit_per_connection(limit),
            ServerOption::MaxConcurrentStreams(max) => builder.max_concurrent_streams(max),
            ServerOption::Http2KeepaliveInterval(interval) => {
                builder.http2_keepalive_interval(Some(interval))
            }
            ServerOption::AcceptHttp1(accept) => builder.accept_http1(accept),
        };
    }
    (builder, StatsLayer::from_observers(observers))
}
