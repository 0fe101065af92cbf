//! TLS 证书加载
//!
//! 证书路径来自 [`TlsConfig`]，读取失败时错误里带上文件路径。

use grpcutil_config::TlsConfig;
use grpcutil_errors::{SetupError, SetupResult};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use tracing::debug;

fn read_pem(path: &str) -> SetupResult<Vec<u8>> {
    debug!(path, "Reading credentials file");
    std::fs::read(path).map_err(|e| SetupError::credentials(path, e))
}

/// 服务端证书：`SSL_CRT_FILE` + `SSL_KEY_FILE`
pub fn server_tls_config(tls: &TlsConfig) -> SetupResult<ServerTlsConfig> {
    let cert = read_pem(&tls.crt_file)?;
    let key = read_pem(&tls.key_file)?;
    Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
}

/// 信任系统根证书的客户端配置
pub fn client_tls_config(tls: &TlsConfig, server_name: &str) -> SetupResult<ClientTlsConfig> {
    trusting(&tls.root_ca_file, server_name)
}

/// 以服务端证书作为 CA 的客户端配置，用于集群内部互信
pub fn peer_tls_config(tls: &TlsConfig, server_name: &str) -> SetupResult<ClientTlsConfig> {
    trusting(&tls.crt_file, server_name)
}

fn trusting(ca_file: &str, server_name: &str) -> SetupResult<ClientTlsConfig> {
    let ca = read_pem(ca_file)?;
    Ok(ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(ca))
        .domain_name(server_name))
}
