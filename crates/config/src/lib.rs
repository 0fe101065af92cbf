//! grpcutil-config - 配置加载库
//!
//! 所有开关在进程启动时一次性解析成不可变的 [`GrpcConfig`]，之后只读。

use std::collections::BTreeMap;

use clap::Parser;
use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::Deserialize;
use thiserror::Error;

/// SSL 证书文件路径的环境变量，默认 `/ssl/tls.crt`
pub const ENV_KEY_CRT_FILE: &str = "SSL_CRT_FILE";
/// SSL 私钥文件路径的环境变量，默认 `/ssl/tls.key`
pub const ENV_KEY_KEY_FILE: &str = "SSL_KEY_FILE";
/// 客户端信任的根证书路径
pub const ENV_KEY_ROOT_CA_FILE: &str = "SSL_ROOT_CA_FILE";
/// 任意非空值都会开启安全模式，包括 `false` 和 `0`
pub const ENV_KEY_SECURE_SERVER: &str = "GRPC_SECURE";
pub const ENV_KEY_PORT: &str = "GRPC_PORT";
pub const ENV_KEY_LOG_BYPASS: &str = "GRPC_LOG_BYPASS";
pub const ENV_KEY_MERGE_OPTIONS: &str = "GRPC_MERGE_OPTIONS";
pub const ENV_KEY_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_KEY_LOG_FORMAT: &str = "LOG_FORMAT";

pub const DEFAULT_CRT_FILE: &str = "/ssl/tls.crt";
pub const DEFAULT_KEY_FILE: &str = "/ssl/tls.key";
pub const DEFAULT_ROOT_CA_FILE: &str = "/etc/ssl/certs/ca-certificates.crt";
pub const DEFAULT_PORT: &str = "50051";

const ENV_KEYS: &[&str] = &[
    ENV_KEY_CRT_FILE,
    ENV_KEY_KEY_FILE,
    ENV_KEY_ROOT_CA_FILE,
    ENV_KEY_SECURE_SERVER,
    ENV_KEY_PORT,
    ENV_KEY_LOG_BYPASS,
    ENV_KEY_MERGE_OPTIONS,
    ENV_KEY_LOG_LEVEL,
    ENV_KEY_LOG_FORMAT,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 默认选项与调用方选项的合并方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// 调用方选项追加在默认选项之后
    #[default]
    Append,
    /// 调用方选项非空时整体替换默认选项
    Override,
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// TLS 文件配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub crt_file: String,
    pub key_file: String,
    pub root_ca_file: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            crt_file: DEFAULT_CRT_FILE.to_string(),
            key_file: DEFAULT_KEY_FILE.to_string(),
            root_ca_file: DEFAULT_ROOT_CA_FILE.to_string(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Text,
        }
    }
}

/// gRPC 配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcConfig {
    /// 监听端口，可以是 `50051`、`:50051` 或 `127.0.0.1:50051`
    pub port: String,
    pub secure: bool,
    pub tls: TlsConfig,
    /// 匹配到的方法不输出调用日志
    pub log_bypass: Option<String>,
    pub merge_strategy: MergeStrategy,
    pub telemetry: TelemetryConfig,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            secure: false,
            tls: TlsConfig::default(),
            log_bypass: None,
            merge_strategy: MergeStrategy::Append,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl GrpcConfig {
    /// 配置来源：`{config_dir}/grpc.toml`（可选），然后是环境变量
    pub fn figment(config_dir: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(format!("{}/grpc.toml", config_dir)))
            .merge(raw_env())
    }

    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(config_dir))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let raw: RawSettings = figment.extract()?;
        Ok(raw.into())
    }

    /// 叠加命令行参数，命令行优先
    pub fn with_cli(mut self, args: &CliArgs) -> Self {
        self.secure = resolve_secure(args.secure_override(), self.secure);
        if let Some(port) = &args.port {
            self.port = port.clone();
        }
        if let Some(bypass) = &args.log_bypass {
            self.log_bypass = Some(bypass.clone());
        }
        self
    }
}

/// 决定是否启用安全模式
///
/// 显式覆盖（`--secure`）优先于环境变量，环境变量优先于默认值 `false`。
pub fn resolve_secure(override_flag: Option<bool>, env_toggle: bool) -> bool {
    override_flag.unwrap_or(env_toggle)
}

/// 命令行参数
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "grpcutil", about = "gRPC server with checker and call logging")]
pub struct CliArgs {
    /// Start secure server instead of internal
    #[arg(long)]
    pub secure: bool,

    /// Port to listen on, overrides GRPC_PORT
    #[arg(long)]
    pub port: Option<String>,

    /// Regex of method names whose call log is suppressed
    #[arg(long)]
    pub log_bypass: Option<String>,

    /// Directory holding grpc.toml
    #[arg(long, default_value = "config")]
    pub config_dir: String,
}

impl CliArgs {
    /// 未传 `--secure` 时不覆盖环境变量
    pub fn secure_override(&self) -> Option<bool> {
        self.secure.then_some(true)
    }
}

/// 按原样读取环境变量，不做类型推断
fn raw_env() -> Serialized<BTreeMap<String, String>> {
    let vars = ENV_KEYS
        .iter()
        .filter_map(|key| {
            std::env::var(key)
                .ok()
                .map(|value| (key.to_ascii_lowercase(), value))
        })
        .collect();
    Serialized::defaults(vars)
}

/// 环境变量一律是字符串，`grpc.toml` 里的值可能是数字或布尔
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EnvValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Empty(()),
}

impl EnvValue {
    fn is_set(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Text(s) => !s.is_empty(),
            Self::Empty(()) => false,
            _ => true,
        }
    }

    fn into_text(self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(n) => Some(n.to_string()),
            Self::Text(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default = "default_crt_file")]
    ssl_crt_file: String,
    #[serde(default = "default_key_file")]
    ssl_key_file: String,
    #[serde(default = "default_root_ca_file")]
    ssl_root_ca_file: String,
    #[serde(default)]
    grpc_secure: Option<EnvValue>,
    #[serde(default)]
    grpc_port: Option<EnvValue>,
    #[serde(default)]
    grpc_log_bypass: Option<EnvValue>,
    #[serde(default)]
    grpc_merge_options: MergeStrategy,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_format: LogFormat,
}

fn default_crt_file() -> String {
    DEFAULT_CRT_FILE.to_string()
}

fn default_key_file() -> String {
    DEFAULT_KEY_FILE.to_string()
}

fn default_root_ca_file() -> String {
    DEFAULT_ROOT_CA_FILE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl From<RawSettings> for GrpcConfig {
    fn from(raw: RawSettings) -> Self {
        Self {
            port: raw
                .grpc_port
                .and_then(EnvValue::into_text)
                .unwrap_or_else(|| DEFAULT_PORT.to_string()),
            secure: raw.grpc_secure.is_some_and(|v| v.is_set()),
            tls: TlsConfig {
                crt_file: raw.ssl_crt_file,
                key_file: raw.ssl_key_file,
                root_ca_file: raw.ssl_root_ca_file,
            },
            log_bypass: raw.grpc_log_bypass.and_then(EnvValue::into_text),
            merge_strategy: raw.grpc_merge_options,
            telemetry: TelemetryConfig {
                log_level: raw.log_level,
                log_format: raw.log_format,
            },
        }
    }
}
