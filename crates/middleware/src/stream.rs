//! 服务端流抽象
//!
//! 流对象不能在调用链中途被替换，只能包装：[`StreamDelegate`] 只覆盖 `context()`，
//! 其余操作原样转发给被包装的流。

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status, Streaming};
use tracing::debug;

use crate::context::CallContext;
use crate::interceptor::AuthInterceptor;

/// 服务端双向流
#[async_trait]
pub trait ServerStream: Send {
    type Inbound: Send;
    type Outbound: Send;

    /// 本次调用的上下文
    fn context(&self) -> &CallContext;

    /// 接收下一条消息，客户端结束发送时返回 `None`
    async fn recv(&mut self) -> Result<Option<Self::Inbound>, Status>;

    async fn send(&mut self, message: Self::Outbound) -> Result<(), Status>;

    /// 发送响应头
    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status>;

    /// 设置随最终状态发送的 trailer
    async fn set_trailer(&mut self, metadata: MetadataMap) -> Result<(), Status>;
}

/// 替换上下文的流包装器
#[derive(Debug)]
pub struct StreamDelegate<S> {
    inner: S,
    ctx: CallContext,
}

impl<S> StreamDelegate<S> {
    pub fn new(inner: S, ctx: CallContext) -> Self {
        Self { inner, ctx }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: ServerStream> ServerStream for StreamDelegate<S> {
    type Inbound = S::Inbound;
    type Outbound = S::Outbound;

    fn context(&self) -> &CallContext {
        &self.ctx
    }

    async fn recv(&mut self) -> Result<Option<Self::Inbound>, Status> {
        self.inner.recv().await
    }

    async fn send(&mut self, message: Self::Outbound) -> Result<(), Status> {
        self.inner.send(message).await
    }

    async fn send_header(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.send_header(metadata).await
    }

    async fn set_trailer(&mut self, metadata: MetadataMap) -> Result<(), Status> {
        self.inner.set_trailer(metadata).await
    }
}

type Inbound<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// 响应流
pub type OutboundStream<T> = ReceiverStream<Result<T, Status>>;

/// 基于 tonic 请求流和 mpsc 响应通道的 [`ServerStream`]
///
/// 双向流 handler 先返回 `Response::new(outbound)`，真正的处理在
/// [`ChannelStream::serve`] 中进行。
pub struct ChannelStream<In, Out> {
    ctx: CallContext,
    inbound: Inbound<In>,
    outbound: mpsc::Sender<Result<Out, Status>>,
}

impl<In, Out> ChannelStream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn new<St>(ctx: CallContext, inbound: St, buffer: usize) -> (Self, OutboundStream<Out>)
    where
        St: Stream<Item = Result<In, Status>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer);
        let stream = Self {
            ctx,
            inbound: Box::pin(inbound),
            outbound: tx,
        };
        (stream, ReceiverStream::new(rx))
    }

    /// 从 tonic 请求创建，上下文取自请求扩展
    pub fn from_request(request: Request<Streaming<In>>, buffer: usize) -> (Self, OutboundStream<Out>) {
        let ctx = CallContext::from_request(&request);
        Self::new(ctx, request.into_inner(), buffer)
    }

    /// 经过 checker 后运行 handler，失败时把状态写回响应流
    pub async fn serve<H, Fut>(self, interceptor: AuthInterceptor, handler: H)
    where
        H: FnOnce(StreamDelegate<Self>) -> Fut + Send,
        Fut: std::future::Future<Output = Result<(), Status>> + Send,
    {
        let errors = self.outbound.clone();
        if let Err(status) = interceptor.stream(self, handler).await {
            if errors.send(Err(status)).await.is_err() {
                debug!("client went away before the stream error could be delivered");
            }
        }
    }
}

#[async_trait]
impl<In, Out> ServerStream for ChannelStream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    type Inbound = In;
    type Outbound = Out;

    fn context(&self) -> &CallContext {
        &self.ctx
    }

    async fn recv(&mut self) -> Result<Option<In>, Status> {
        self.inbound.next().await.transpose()
    }

    async fn send(&mut self, message: Out) -> Result<(), Status> {
        self.outbound
            .send(Ok(message))
            .await
            .map_err(|_| Status::cancelled("client closed the stream"))
    }

    /// tonic 在 handler 返回 `Response` 时已经发送响应头
    async fn send_header(&mut self, _metadata: MetadataMap) -> Result<(), Status> {
        Err(Status::failed_precondition("response headers already sent"))
    }

    /// trailer 只能随 handler 返回的 `Status` 发送
    async fn set_trailer(&mut self, _metadata: MetadataMap) -> Result<(), Status> {
        Err(Status::unimplemented("trailers are carried by the final status"))
    }
}
