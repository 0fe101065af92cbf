//! gRPC Interceptors
//!
//! 把 checker 包装成一元调用和流式调用两种拦截器。checker 失败时调用立即结束，
//! handler 不会被执行；成功时用 checker 返回的上下文继续调用链。

use std::future::Future;
use std::sync::Arc;

use grpcutil_errors::CheckerError;
use tonic::{Request, Status};
use tracing::debug;

use crate::checker::Checker;
use crate::context::CallContext;
use crate::stream::{ServerStream, StreamDelegate};

/// 认证拦截器
#[derive(Clone)]
pub struct AuthInterceptor {
    checker: Arc<dyn Checker>,
}

impl AuthInterceptor {
    pub fn new(checker: impl Checker) -> Self {
        Self {
            checker: Arc::new(checker),
        }
    }

    /// 运行 checker，失败时包装原始错误
    pub fn check(&self, ctx: CallContext) -> Result<CallContext, CheckerError> {
        let method = ctx.scope().map(|scope| scope.method().to_string());
        self.checker.check(ctx).map_err(|source| {
            let err = CheckerError::new(source);
            debug!(method = method.as_deref().unwrap_or("unknown"), error = %err, "Call rejected");
            err
        })
    }

    /// 一元调用
    ///
    /// handler 收到的是 checker 返回的上下文，其返回值原样透传。
    pub async fn unary<Req, Resp, H, Fut>(
        &self,
        ctx: CallContext,
        request: Req,
        handler: H,
    ) -> Result<Resp, Status>
    where
        H: FnOnce(CallContext, Req) -> Fut,
        Fut: Future<Output = Result<Resp, Status>>,
    {
        let ctx = self.check(ctx)?;
        handler(ctx, request).await
    }

    /// 流式调用
    ///
    /// handler 收到的流只替换了 `context()`，收发操作仍然落在原始流上。
    pub async fn stream<S, H, Fut>(&self, stream: S, handler: H) -> Result<(), Status>
    where
        S: ServerStream,
        H: FnOnce(StreamDelegate<S>) -> Fut,
        Fut: Future<Output = Result<(), Status>>,
    {
        let ctx = self.check(stream.context().clone())?;
        handler(StreamDelegate::new(stream, ctx)).await
    }
}

impl std::fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInterceptor").finish_non_exhaustive()
    }
}

/// 挂到 tonic 生成的服务上：`XxxServer::with_interceptor(svc, interceptor)`
///
/// 一元和流式调用都会经过这里，checker 返回的上下文写回请求扩展，
/// handler 通过 [`CallContext::from_request`] 取得。
impl tonic::service::Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let ctx = self.check(CallContext::from_request(&request))?;
        request.extensions_mut().insert(ctx);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Principal(&'static str);

    fn reject_all(_ctx: CallContext) -> Result<CallContext, Status> {
        Err(Status::unauthenticated("missing token"))
    }

    #[tokio::test]
    async fn test_unary_rejection_skips_handler() {
        let interceptor = AuthInterceptor::new(reject_all);
        let calls = AtomicUsize::new(0);

        let result: Result<&str, Status> = interceptor
            .unary(CallContext::default(), "req", |_ctx, _req| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("resp")
            })
            .await;

        let status = result.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "checker failed: missing token");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unary_handler_receives_checker_context() {
        let replaced = CallContext::default().with_value(Principal("alice"));
        let returned = replaced.clone();
        let interceptor = AuthInterceptor::new(move |_ctx: CallContext| -> Result<CallContext, Status> {
            Ok(returned.clone())
        });

        let original = CallContext::default();
        let seen = interceptor
            .unary(original.clone(), 41, |ctx, req| async move { Ok((ctx, req + 1)) })
            .await
            .unwrap();

        assert!(CallContext::ptr_eq(&seen.0, &replaced));
        assert!(!CallContext::ptr_eq(&seen.0, &original));
        assert_eq!(seen.1, 42);
    }

    #[tokio::test]
    async fn test_unary_handler_error_passes_through() {
        let interceptor = AuthInterceptor::new(|ctx: CallContext| -> Result<CallContext, Status> { Ok(ctx) });

        let status = interceptor
            .unary(CallContext::default(), (), |_ctx, _req| async {
                Err::<(), _>(Status::not_found("no such item"))
            })
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "no such item");
    }

    #[test]
    fn test_tonic_interceptor_stores_context() {
        let mut interceptor = AuthInterceptor::new(|ctx: CallContext| -> Result<CallContext, Status> {
            let token = ctx
                .metadata()
                .get("authorization")
                .ok_or_else(|| Status::unauthenticated("missing authorization"))?;
            if token.to_str().ok() != Some("Bearer secret") {
                return Err(Status::unauthenticated("bad token"));
            }
            Ok(ctx.with_value(Principal("svc")))
        });

        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("authorization", "Bearer secret".parse().unwrap());
        let request = tonic::service::Interceptor::call(&mut interceptor, request).unwrap();
        let ctx = CallContext::from_request(&request);
        assert_eq!(ctx.get::<Principal>(), Some(&Principal("svc")));

        let status = tonic::service::Interceptor::call(&mut interceptor, Request::new(())).unwrap_err();
        assert_eq!(status.message(), "checker failed: missing authorization");
    }
}
