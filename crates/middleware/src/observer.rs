//! 调用生命周期观察者

use std::net::SocketAddr;
use std::time::Instant;

use grpcutil_errors::BoxError;

use crate::context::CallContext;

/// tag 阶段可见的调用信息
#[derive(Debug, Clone, Copy)]
pub struct CallInfo<'a> {
    /// 完整方法名，如 `/helloworld.Greeter/SayHello`
    pub method: &'a str,
}

/// 连接信息
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnInfo {
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy)]
pub struct CallBegin {
    pub begin_time: Instant,
}

/// 调用结束事件，`error` 为空表示成功
#[derive(Debug)]
pub struct CallEnd {
    pub end_time: Instant,
    pub error: Option<BoxError>,
}

impl CallEnd {
    pub fn ok(end_time: Instant) -> Self {
        Self {
            end_time,
            error: None,
        }
    }

    pub fn failed(end_time: Instant, error: impl Into<BoxError>) -> Self {
        Self {
            end_time,
            error: Some(error.into()),
        }
    }
}

/// 调用事件
#[derive(Debug)]
#[non_exhaustive]
pub enum CallEvent {
    Begin(CallBegin),
    /// 响应体发出一帧数据
    OutPayload,
    End(CallEnd),
}

#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ConnEvent {
    Begin,
    End,
}

/// 调用生命周期观察者
///
/// 每个调用先经过一次 `tag_call`，之后按顺序收到若干 `handle_call` 事件，
/// `CallEvent::End` 每个调用最多出现一次。
pub trait CallObserver: Send + Sync + 'static {
    /// 在 handler 执行前给调用打上标记，返回派生出的上下文
    fn tag_call(&self, info: &CallInfo<'_>, ctx: CallContext) -> CallContext;

    fn handle_call(&self, ctx: &CallContext, event: &CallEvent);

    fn tag_conn(&self, _info: &ConnInfo, ctx: CallContext) -> CallContext {
        ctx
    }

    fn handle_conn(&self, _ctx: &CallContext, _event: &ConnEvent) {}
}
