//! Graceful Shutdown

use std::future::Future;

use tokio::sync::watch;
use tracing::info;

/// Shutdown 控制器
///
/// 触发后所有已有和之后创建的等待者都会完成。
#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// 关闭时完成的 future，可以直接交给 `serve_with_shutdown`
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // sender 被 drop 时同样视为关闭
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }

    /// 收到进程信号时触发关闭
    pub fn trigger_on_signal(&self) -> tokio::task::JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            crate::runtime::shutdown_signal().await;
            controller.shutdown();
        })
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
