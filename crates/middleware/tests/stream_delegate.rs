//! 流式拦截器集成测试

use std::collections::VecDeque;

use async_trait::async_trait;
use grpcutil_middleware::{AuthInterceptor, CallContext, ServerStream, StreamDelegate};
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

#[derive(Debug, PartialEq)]
struct Tenant(&'static str);

#[derive(Default)]
struct MockStream {
    ctx: CallContext,
    inbound: VecDeque<String>,
    sent: Vec<String>,
    headers: usize,
    trailers: usize,
}

impl MockStream {
    fn with_messages(messages: &[&str]) -> Self {
        Self {
            inbound: messages.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ServerStream for MockStream {
    type Inbound = String;
    type Outbound = String;

    fn context(&self) -> &CallContext {
        &self.ctx
    }

    async fn recv(&mut self) -> Result<Option<String>, Status> {
        Ok(self.inbound.pop_front())
    }

    async fn send(&mut self, message: String) -> Result<(), Status> {
        self.sent.push(message);
        Ok(())
    }

    async fn send_header(&mut self, _metadata: MetadataMap) -> Result<(), Status> {
        self.headers += 1;
        Ok(())
    }

    async fn set_trailer(&mut self, _metadata: MetadataMap) -> Result<(), Status> {
        self.trailers += 1;
        Ok(())
    }
}

fn tenant_checker(ctx: CallContext) -> Result<CallContext, Status> {
    Ok(ctx.with_value(Tenant("acme")))
}

async fn echo(mut stream: StreamDelegate<MockStream>) -> Result<StreamDelegate<MockStream>, Status> {
    assert_eq!(stream.context().get::<Tenant>(), Some(&Tenant("acme")));

    stream.send_header(MetadataMap::new()).await?;
    while let Some(message) = stream.recv().await? {
        stream.send(message.to_uppercase()).await?;
    }
    stream.set_trailer(MetadataMap::new()).await?;
    Ok(stream)
}

#[tokio::test]
async fn test_delegate_forwards_to_wrapped_stream() {
    let interceptor = AuthInterceptor::new(tenant_checker);
    let stream = MockStream::with_messages(&["ping", "pong"]);

    let mut finished = None;
    interceptor
        .stream(stream, |delegate| async {
            finished = Some(echo(delegate).await);
            Ok(())
        })
        .await
        .unwrap();

    let delegate = finished.unwrap().unwrap();
    assert!(delegate.get_ref().ctx.get::<Tenant>().is_none());

    let inner = delegate.into_inner();
    assert_eq!(inner.sent, vec!["PING", "PONG"]);
    assert_eq!(inner.headers, 1);
    assert_eq!(inner.trailers, 1);
    assert!(inner.inbound.is_empty());
}

#[tokio::test]
async fn test_delegate_context_is_checker_output() {
    let replaced = CallContext::default().with_value(Tenant("globex"));
    let returned = replaced.clone();
    let interceptor = AuthInterceptor::new(move |_ctx: CallContext| -> Result<CallContext, Status> {
        Ok(returned.clone())
    });

    let stream = MockStream::default();
    let original = stream.ctx.clone();

    interceptor
        .stream(stream, |delegate| async move {
            assert!(CallContext::ptr_eq(delegate.context(), &replaced));
            assert!(!CallContext::ptr_eq(delegate.context(), &original));
            assert!(CallContext::ptr_eq(delegate.get_ref().context(), &original));
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stream_rejection_skips_handler() {
    let interceptor = AuthInterceptor::new(|_ctx: CallContext| -> Result<CallContext, Status> {
        Err(Status::permission_denied("tenant suspended"))
    });

    let mut invoked = false;
    let status = interceptor
        .stream(MockStream::with_messages(&["ping"]), |_delegate| async {
            invoked = true;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(!invoked);
    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(status.message(), "checker failed: tenant suspended");
}

#[tokio::test]
async fn test_handler_error_is_returned_unchanged() {
    let interceptor = AuthInterceptor::new(tenant_checker);

    let status = interceptor
        .stream(MockStream::default(), |_delegate| async {
            Err(Status::resource_exhausted("slow down"))
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::ResourceExhausted);
    assert_eq!(status.message(), "slow down");
}
