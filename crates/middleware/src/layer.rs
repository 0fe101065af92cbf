//! tower 层：把 [`CallObserver`] 接到 tonic 服务端
//!
//! 每个 HTTP/2 请求视为一次 gRPC 调用：
//! 1. 以 URI path 作为方法名，按注册顺序调用 `tag_call`，随后投递 `Begin`
//! 2. 标记后的上下文写入请求扩展，handler 可用 [`CallContext::from_request`] 取得
//! 3. 调用结束时投递且只投递一次 `End`
//!
//! 结束时机：内层服务出错、响应头带 `grpc-status`（trailers-only）、
//! 响应体读到 trailers / 读完 / 出错，或者响应体在此之前被丢弃（记为 `Cancelled`）。

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Instant;

use futures::future::BoxFuture;
use grpcutil_errors::BoxError;
use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame, SizeHint};
use tonic::{Code, Status};
use tower::{Layer, Service};

use crate::context::CallContext;
use crate::observer::{CallBegin, CallEnd, CallEvent, CallInfo, CallObserver};

type Observers = Arc<[Arc<dyn CallObserver>]>;

/// 调用观察层
#[derive(Clone)]
pub struct StatsLayer {
    observers: Observers,
}

impl StatsLayer {
    pub fn new() -> Self {
        Self::from_observers(Vec::new())
    }

    pub fn from_observers(observers: Vec<Arc<dyn CallObserver>>) -> Self {
        Self {
            observers: observers.into(),
        }
    }

    /// 追加一个观察者，事件按注册顺序投递
    pub fn with_observer(self, observer: impl CallObserver) -> Self {
        let mut observers = self.observers.to_vec();
        observers.push(Arc::new(observer));
        Self::from_observers(observers)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Default for StatsLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsLayer")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl<S> Layer<S> for StatsLayer {
    type Service = StatsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StatsService {
            inner,
            observers: self.observers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct StatsService<S> {
    inner: S,
    observers: Observers,
}

impl<S> StatsService<S> {
    fn tag(&self, method: &str, headers: &HeaderMap) -> CallContext {
        let info = CallInfo { method };
        let ctx = self
            .observers
            .iter()
            .fold(CallContext::from_headers(headers), |ctx, observer| {
                observer.tag_call(&info, ctx)
            });

        let begin = CallEvent::Begin(CallBegin {
            begin_time: Instant::now(),
        });
        for observer in self.observers.iter() {
            observer.handle_call(&ctx, &begin);
        }
        ctx
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for StatsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send,
    ReqBody: Send + 'static,
    ResBody: Body + Send + 'static,
    ResBody::Error: fmt::Display,
{
    type Response = Response<ObservedBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        if self.observers.is_empty() {
            let future = self.inner.call(request);
            return Box::pin(async move {
                future.await.map(|response| response.map(ObservedBody::finished))
            });
        }

        let ctx = self.tag(request.uri().path(), request.headers());
        request.extensions_mut().insert(ctx.clone());
        let mut guard = CallGuard::new(ctx, self.observers.clone());

        // poll_ready 针对的是 self.inner，把它换出来使用
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match inner.call(request).await {
                Err(err) => {
                    guard.finish(Some(err.to_string().into()));
                    Err(err)
                }
                Ok(response) => match Status::from_header_map(response.headers()) {
                    Some(status) => {
                        guard.finish(status_error(status));
                        Ok(response.map(ObservedBody::finished))
                    }
                    None => Ok(response.map(|body| ObservedBody::new(body, guard))),
                },
            }
        })
    }
}

/// 非 OK 状态视为调用失败
fn status_error(status: Status) -> Option<BoxError> {
    match status.code() {
        Code::Ok => None,
        _ => Some(status.into()),
    }
}

/// 保证每个调用恰好投递一次 `End`
struct CallGuard {
    ctx: CallContext,
    observers: Observers,
    done: bool,
}

impl CallGuard {
    fn new(ctx: CallContext, observers: Observers) -> Self {
        Self {
            ctx,
            observers,
            done: false,
        }
    }

    fn emit(&self, event: &CallEvent) {
        for observer in self.observers.iter() {
            observer.handle_call(&self.ctx, event);
        }
    }

    fn finish(&mut self, error: Option<BoxError>) {
        if self.done {
            return;
        }
        self.done = true;
        self.emit(&CallEvent::End(CallEnd {
            end_time: Instant::now(),
            error,
        }));
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.finish(Some(
            Status::cancelled("call dropped before completion").into(),
        ));
    }
}

/// 在响应体结束时投递 `End` 的包装
pub struct ObservedBody<B> {
    inner: Pin<Box<B>>,
    guard: Option<CallGuard>,
}

impl<B> ObservedBody<B> {
    fn new(inner: B, guard: CallGuard) -> Self {
        Self {
            inner: Box::pin(inner),
            guard: Some(guard),
        }
    }

    /// `End` 已经投递过的响应体
    fn finished(inner: B) -> Self {
        Self {
            inner: Box::pin(inner),
            guard: None,
        }
    }

    fn finish(&mut self, error: Option<BoxError>) {
        if let Some(mut guard) = self.guard.take() {
            guard.finish(error);
        }
    }
}

impl<B> fmt::Debug for ObservedBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedBody")
            .field("pending", &self.guard.is_some())
            .finish()
    }
}

impl<B> Body for ObservedBody<B>
where
    B: Body,
    B::Error: fmt::Display,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = ready!(this.inner.as_mut().poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let Some(trailers) = frame.trailers_ref() {
                    let error = Status::from_header_map(trailers).and_then(status_error);
                    this.finish(error);
                } else if let Some(guard) = &this.guard {
                    guard.emit(&CallEvent::OutPayload);
                }
            }
            Some(Err(err)) => this.finish(Some(err.to_string().into())),
            None => this.finish(None),
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        // 还没投递 End 时要求继续 poll，避免被直接丢弃
        self.guard.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
