//! 调度句柄
//!
//! 模块通过它在运行时上生成后台任务。用 [`SchedulerHandle::spawn_cancellable`]
//! 生成的任务会在运行时关闭时收到取消信号。

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 调度句柄
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    handle: Handle,
    token: CancellationToken,
}

impl SchedulerHandle {
    /// 绑定当前 tokio 运行时
    ///
    /// # Panics
    ///
    /// 不在 tokio 运行时内调用时 panic，与 `tokio::spawn` 一致。
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
            token: CancellationToken::new(),
        }
    }

    /// 生成普通任务
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// 生成可取消任务，运行时关闭时返回 `None`
    pub fn spawn_cancellable<F>(&self, future: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.token.child_token();
        self.handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => None,
                output = future => Some(output),
            }
        })
    }

    /// 关闭信号，模块可以在自己的循环里监听
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 是否已关闭
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 通知所有可取消任务退出
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            debug!("调度句柄关闭，取消后台任务");
            self.token.cancel();
        }
    }
}
