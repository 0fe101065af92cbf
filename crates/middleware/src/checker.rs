//! checker：调用方提供的认证/校验函数

use grpcutil_errors::BoxError;

use crate::context::CallContext;

/// 对调用上下文做认证或校验，返回（可能是新的）上下文
///
/// 同步执行，耗时计入调用总耗时。闭包
/// `Fn(CallContext) -> Result<CallContext, E>` 自动实现该 trait。
pub trait Checker: Send + Sync + 'static {
    fn check(&self, ctx: CallContext) -> Result<CallContext, BoxError>;
}

impl<F, E> Checker for F
where
    F: Fn(CallContext) -> Result<CallContext, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    fn check(&self, ctx: CallContext) -> Result<CallContext, BoxError> {
        self(ctx).map_err(Into::into)
    }
}
