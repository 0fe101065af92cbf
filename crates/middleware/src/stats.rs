//! 调用耗时日志
//!
//! 每个完成的调用输出一行日志：
//! 成功 `"<method> (<duration>)"`，失败 `"<method> - <message> (<duration>)"`。

use std::fmt;
use std::time::Duration;

use grpcutil_errors::BoxError;
use regex::Regex;
use tonic::{Code, Status};
use tracing::{debug, info, warn};

use crate::clock;
use crate::context::{CallContext, CallScope};
use crate::observer::{CallEnd, CallEvent, CallInfo, CallObserver, ConnEvent, ConnInfo};

/// 调用结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(Duration),
    Failure(Duration, String),
}

impl CallOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Success(elapsed) | Self::Failure(elapsed, _) => *elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// 一条调用日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub method: String,
    pub outcome: CallOutcome,
}

impl CallRecord {
    pub fn elapsed_text(&self) -> String {
        clock::format_duration(self.outcome.elapsed())
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            CallOutcome::Success(_) => write!(f, "{} ({})", self.method, self.elapsed_text()),
            CallOutcome::Failure(_, message) => {
                write!(f, "{} - {} ({})", self.method, message, self.elapsed_text())
            }
        }
    }
}

/// 记录方法名和耗时的观察者
#[derive(Debug, Clone, Default)]
pub struct StatsObserver {
    log_bypass: Option<Regex>,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 匹配 `bypass` 的方法不输出日志
    pub fn with_bypass(bypass: Regex) -> Self {
        Self {
            log_bypass: Some(bypass),
        }
    }

    /// 编译可选的 bypass 正则
    pub fn from_pattern(pattern: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            log_bypass: pattern.map(Regex::new).transpose()?,
        })
    }

    pub fn is_bypassed(&self, method: &str) -> bool {
        self.log_bypass
            .as_ref()
            .is_some_and(|bypass| bypass.is_match(method))
    }

    /// 从结束事件计算日志记录，非结束事件、缺少作用域或被过滤的方法返回 `None`
    pub fn record(&self, ctx: &CallContext, event: &CallEvent) -> Option<CallRecord> {
        let CallEvent::End(end) = event else {
            return None;
        };

        let scope = match ctx.require_scope() {
            Ok(scope) => scope,
            Err(err) => {
                debug!(error = %err, "Skipping call timing");
                return None;
            }
        };

        let elapsed = clock::elapsed(scope.start(), end.end_time);

        if self.is_bypassed(scope.method()) {
            return None;
        }

        let outcome = match &end.error {
            Some(err) => CallOutcome::Failure(elapsed, error_message(err)),
            None => CallOutcome::Success(elapsed),
        };

        Some(CallRecord {
            method: scope.method().to_string(),
            outcome,
        })
    }
}

/// gRPC 状态取其 message，其他错误取 Display
fn error_message(err: &BoxError) -> String {
    match err.downcast_ref::<Status>() {
        Some(status) => status.message().to_string(),
        None => err.to_string(),
    }
}

fn failure_code(event: &CallEvent) -> Code {
    match event {
        CallEvent::End(CallEnd {
            error: Some(err), ..
        }) => err
            .downcast_ref::<Status>()
            .map_or(Code::Unknown, Status::code),
        _ => Code::Ok,
    }
}

impl CallObserver for StatsObserver {
    fn tag_call(&self, info: &CallInfo<'_>, ctx: CallContext) -> CallContext {
        ctx.with_scope(CallScope::new(info.method))
    }

    fn handle_call(&self, ctx: &CallContext, event: &CallEvent) {
        let Some(record) = self.record(ctx, event) else {
            return;
        };

        let elapsed = record.elapsed_text();
        match &record.outcome {
            CallOutcome::Success(_) => {
                info!(method = %record.method, elapsed = %elapsed, "{}", record);
            }
            CallOutcome::Failure(_, message) => {
                let code = failure_code(event);
                warn!(method = %record.method, elapsed = %elapsed, ?code, error = %message, "{}", record);
            }
        }
    }

    fn tag_conn(&self, _info: &ConnInfo, ctx: CallContext) -> CallContext {
        ctx
    }

    fn handle_conn(&self, _ctx: &CallContext, _event: &ConnEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::CallBegin;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn tagged(observer: &StatsObserver, method: &str) -> (CallContext, Instant) {
        let ctx = observer.tag_call(&CallInfo { method }, CallContext::default());
        let start = ctx.scope().unwrap().start();
        (ctx, start)
    }

    #[test]
    fn test_success_line() {
        let observer = StatsObserver::new();
        let (ctx, start) = tagged(&observer, "/svc/Get");

        let end = CallEvent::End(CallEnd::ok(start + Duration::from_millis(50)));
        let record = observer.record(&ctx, &end).unwrap();

        assert_eq!(record.outcome, CallOutcome::Success(Duration::from_millis(50)));
        assert_eq!(record.to_string(), "/svc/Get (50.000ms)");
    }

    #[test]
    fn test_failure_uses_status_message() {
        let observer = StatsObserver::new();
        let (ctx, start) = tagged(&observer, "/svc/Put");

        let end = CallEvent::End(CallEnd::failed(
            start + Duration::from_micros(2345),
            Status::invalid_argument("name is required"),
        ));
        let record = observer.record(&ctx, &end).unwrap();

        assert_eq!(record.to_string(), "/svc/Put - name is required (2.345ms)");
    }

    #[test]
    fn test_failure_falls_back_to_error_display() {
        let observer = StatsObserver::new();
        let (ctx, start) = tagged(&observer, "/svc/Put");

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "connection reset");
        let end = CallEvent::End(CallEnd::failed(start + Duration::from_millis(1500), io));
        let record = observer.record(&ctx, &end).unwrap();

        assert_eq!(record.to_string(), "/svc/Put - connection reset (1.5s)");
    }

    #[test]
    fn test_bypass_suppresses_success_and_failure() {
        let observer = StatsObserver::from_pattern(Some("^/grpc\\.health")).unwrap();
        let (ctx, start) = tagged(&observer, "/grpc.health.v1.Health/Check");

        let ok = CallEvent::End(CallEnd::ok(start));
        let failed = CallEvent::End(CallEnd::failed(start, Status::unavailable("down")));

        assert!(observer.record(&ctx, &ok).is_none());
        assert!(observer.record(&ctx, &failed).is_none());

        let (other, start) = tagged(&observer, "/svc/Get");
        assert!(observer.record(&other, &CallEvent::End(CallEnd::ok(start))).is_some());
    }

    #[test]
    fn test_non_terminal_events_are_ignored() {
        let observer = StatsObserver::new();
        let (ctx, start) = tagged(&observer, "/svc/Get");

        let begin = CallEvent::Begin(CallBegin { begin_time: start });
        assert!(observer.record(&ctx, &begin).is_none());
        assert!(observer.record(&ctx, &CallEvent::OutPayload).is_none());
    }

    #[test]
    fn test_missing_scope_is_skipped() {
        let observer = StatsObserver::new();
        let end = CallEvent::End(CallEnd::ok(Instant::now()));

        assert!(observer.record(&CallContext::default(), &end).is_none());
        // 不 panic，也不影响调用
        observer.handle_call(&CallContext::default(), &end);
    }

    #[test]
    fn test_sub_millisecond_call() {
        let observer = StatsObserver::new();
        let (ctx, start) = tagged(&observer, "/svc/Ping");

        let end = CallEvent::End(CallEnd::ok(start + Duration::from_micros(500)));
        assert_eq!(observer.record(&ctx, &end).unwrap().to_string(), "/svc/Ping (500µs)");
    }

    #[test]
    fn test_connection_hooks_pass_through() {
        let observer = StatsObserver::new();
        let ctx = CallContext::default();

        let tagged = observer.tag_conn(&ConnInfo::default(), ctx.clone());
        assert!(CallContext::ptr_eq(&tagged, &ctx));
        observer.handle_conn(&tagged, &ConnEvent::Begin);
    }

    #[test]
    fn test_failure_code() {
        let now = Instant::now();
        let status = CallEvent::End(CallEnd::failed(now, Status::not_found("gone")));
        let io = CallEvent::End(CallEnd::failed(now, std::io::Error::other("reset")));

        assert_eq!(failure_code(&status), Code::NotFound);
        assert_eq!(failure_code(&io), Code::Unknown);
        assert_eq!(failure_code(&CallEvent::End(CallEnd::ok(now))), Code::Ok);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(StatsObserver::from_pattern(Some("(")).is_err());
        assert!(!StatsObserver::from_pattern(None).unwrap().is_bypassed("/svc/Get"));
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// 在临时 subscriber 下运行，返回输出的日志文本
    fn capture_logs(f: impl FnOnce()) -> String {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let bytes = log.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_handle_call_logs_success_at_info() {
        let observer = StatsObserver::new();
        let (ctx, start) = tagged(&observer, "/svc/Get");
        let end = CallEvent::End(CallEnd::ok(start + Duration::from_millis(50)));

        let output = capture_logs(|| observer.handle_call(&ctx, &end));

        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("INFO"));
        assert!(output.contains("/svc/Get (50.000ms)"));
        assert!(output.contains("elapsed=50.000ms"));
    }

    #[test]
    fn test_handle_call_logs_failure_at_warn() {
        let observer = StatsObserver::new();
        let (ctx, start) = tagged(&observer, "/svc/Put");
        let end = CallEvent::End(CallEnd::failed(
            start + Duration::from_millis(3),
            Status::not_found("gone"),
        ));

        let output = capture_logs(|| observer.handle_call(&ctx, &end));

        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("WARN"));
        assert!(output.contains("/svc/Put - gone (3.000ms)"));
        assert!(output.contains("code=NotFound"));
    }

    #[test]
    fn test_handle_call_silent_for_bypass_and_begin() {
        let observer = StatsObserver::from_pattern(Some("Health")).unwrap();
        let (health, start) = tagged(&observer, "/grpc.health.v1.Health/Check");
        let (other, _) = tagged(&observer, "/svc/Get");

        let output = capture_logs(|| {
            observer.handle_call(&health, &CallEvent::End(CallEnd::ok(start)));
            observer.handle_call(&other, &CallEvent::Begin(CallBegin { begin_time: start }));
        });

        assert!(output.is_empty(), "unexpected log output: {output}");
    }
}
