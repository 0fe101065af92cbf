//! Bearer token checker

use grpcutil_middleware::{AuthInterceptor, CallContext};
use tonic::Status;
use tonic::metadata::MetadataMap;

/// 通过校验的调用方 token，写入调用上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

/// 只接受指定 token 的认证拦截器
pub fn bearer_interceptor(expected: impl Into<String>) -> AuthInterceptor {
    let expected = expected.into();
    AuthInterceptor::new(move |ctx: CallContext| -> Result<CallContext, Status> {
        let token = extract_token(ctx.metadata())?;
        if token != expected {
            return Err(Status::unauthenticated("Invalid token"));
        }
        Ok(ctx.with_value(BearerToken(token)))
    })
}

/// 从 metadata 中提取 token
#[allow(clippy::result_large_err)]
pub fn extract_token(metadata: &MetadataMap) -> Result<String, Status> {
    let auth_header = metadata
        .get("authorization")
        .ok_or_else(|| Status::unauthenticated("Missing authorization header"))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| Status::unauthenticated("Invalid authorization header"))?;

    auth_str
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| Status::unauthenticated("Invalid authorization scheme"))
}
