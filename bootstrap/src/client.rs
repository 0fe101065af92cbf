//! gRPC 客户端连接
//!
//! 内部连接不带证书；安全连接以 `SSL_CRT_FILE` 作为 CA 并覆盖 server name。

use std::time::Duration;

use grpcutil_config::{GrpcConfig, TlsConfig};
use grpcutil_errors::{SetupError, SetupResult};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::credentials;

/// 拨号选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOption {
    ConnectTimeout(Duration),
    /// 单个请求的超时
    Timeout(Duration),
    ConcurrencyLimit(usize),
    TcpNodelay(bool),
    Http2KeepaliveInterval(Duration),
    UserAgent(String),
}

/// 没有 scheme 的地址补上 `http://` 或 `https://`
pub fn endpoint_uri(host: &str, secure: bool) -> String {
    if host.contains("://") {
        host.to_string()
    } else if secure {
        format!("https://{host}")
    } else {
        format!("http://{host}")
    }
}

fn endpoint(uri: String, opts: Vec<DialOption>) -> SetupResult<Endpoint> {
    let invalid = |endpoint: &str, source| SetupError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    };

    let mut endpoint = Endpoint::from_shared(uri.clone()).map_err(|e| invalid(&uri, e))?;
    for opt in opts {
        endpoint = match opt {
            DialOption::ConnectTimeout(timeout) => endpoint.connect_timeout(timeout),
            DialOption::Timeout(timeout) => endpoint.timeout(timeout),
            DialOption::ConcurrencyLimit(limit) => endpoint.concurrency_limit(limit),
            DialOption::TcpNodelay(enabled) => endpoint.tcp_nodelay(enabled),
            DialOption::Http2KeepaliveInterval(interval) => {
                endpoint.http2_keep_alive_interval(interval)
            }
            DialOption::UserAgent(agent) => {
                endpoint.user_agent(agent).map_err(|e| invalid(&uri, e))?
            }
        };
    }
    Ok(endpoint)
}

async fn dial(endpoint: Endpoint) -> SetupResult<Channel> {
    let target = endpoint.uri().to_string();
    debug!(endpoint = %target, "Dialing service");
    endpoint.connect().await.map_err(|source| SetupError::Dial {
        endpoint: target,
        source,
    })
}

/// 客户端连接工厂
#[derive(Debug, Clone, Default)]
pub struct ConnectionFactory {
    tls: TlsConfig,
}

impl ConnectionFactory {
    pub fn new(tls: TlsConfig) -> Self {
        Self { tls }
    }

    pub fn from_config(config: &GrpcConfig) -> Self {
        Self::new(config.tls.clone())
    }

    /// 不带证书的连接
    pub async fn internal_connection(
        &self,
        host: &str,
        opts: Vec<DialOption>,
    ) -> SetupResult<Channel> {
        dial(endpoint(endpoint_uri(host, false), opts)?).await
    }

    /// 以 `SSL_CRT_FILE` 为 CA、`server_name` 为证书域名的 TLS 连接
    pub async fn secure_connection(
        &self,
        host: &str,
        server_name: &str,
        opts: Vec<DialOption>,
    ) -> SetupResult<Channel> {
        let tls = credentials::peer_tls_config(&self.tls, server_name)?;
        let endpoint = endpoint(endpoint_uri(host, true), opts)?
            .tls_config(tls)
            .map_err(SetupError::Tls)?;
        dial(endpoint).await
    }

    /// 信任系统根证书的 TLS 配置
    pub fn client_tls_config(&self, server_name: &str) -> SetupResult<ClientTlsConfig> {
        credentials::client_tls_config(&self.tls, server_name)
    }
}
