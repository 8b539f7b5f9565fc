//! 有界工作池
//!
//! 启动与停止都在这里执行：
//! - `WorkerPool`: 基于信号量限制同时运行的任务数，默认并发数为 CPU 核心数 × 2
//! - `with_timeout`: 为单个任务加上时限
//!
//! 每个任务都在独立的 tokio 任务中运行，任务内的 panic 被转换为 [`TaskError::Panicked`]，
//! 不会影响同一批次的其他任务。

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, warn};

/// 任务执行失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// 任务 panic
    #[error("任务崩溃: {0}")]
    Panicked(String),
    /// 任务超时
    #[error("超过时限 {}ms", .0.as_millis())]
    TimedOut(Duration),
    /// 任务在完成前被中止
    #[error("任务被中止")]
    Aborted,
}

impl From<JoinError> for TaskError {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            TaskError::Panicked(panic_message(err.into_panic()))
        } else {
            TaskError::Aborted
        }
    }
}

/// 从 panic 负载中提取消息
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "未知 panic".to_string()
    }
}

// ==================== 工作池 ====================

/// 有界工作池
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl WorkerPool {
    /// 创建工作池，并发数至少为 1
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        debug!(max_concurrency, "创建工作池");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// 使用默认并发数（CPU 核心数 × 2）
    pub fn with_default_concurrency() -> Self {
        Self::new(default_concurrency())
    }

    /// 最大并发数
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 当前空闲许可数
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 并发执行一批任务并等待全部完成
    ///
    /// 返回结果与输入顺序一致。这是一个屏障：只有所有任务都结束后才返回。
    pub async fn run_all<F, T>(&self, tasks: Vec<F>) -> Vec<Result<T, TaskError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let semaphore = Arc::clone(&self.semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| TaskError::Aborted)?;
                    Ok::<T, TaskError>(task.await)
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.map_err(TaskError::from).and_then(|inner| inner))
            .collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_default_concurrency()
    }
}

/// 默认并发数 = CPU 核心数 × 2
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        * 2
}

/// 使用超时执行 Future
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TaskError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => Ok(result),
        Err(_elapsed) => {
            warn!(timeout_ms = duration.as_millis() as u64, "任务超时");
            Err(TaskError::TimedOut(duration))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_all_preserves_order() {
        let pool = WorkerPool::new(2);
        let tasks: Vec<_> = (0..5u64)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                i
            })
            .collect();

        let results = pool.run_all(tasks).await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_run_all_respects_bound() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        pool.run_all(tasks).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let pool = WorkerPool::new(4);
        let tasks: Vec<std::pin::Pin<Box<dyn Future<Output = u32> + Send>>> = vec![
            Box::pin(async { 1 }),
            Box::pin(async { panic!("模块崩溃") }),
            Box::pin(async { 3 }),
        ];

        let results = pool.run_all(tasks).await;
        assert_eq!(results[0], Ok(1));
        assert_eq!(results[1], Err(TaskError::Panicked("模块崩溃".to_string())));
        assert_eq!(results[2], Ok(3));
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let ok = with_timeout(Duration::from_millis(100), async { 7 }).await;
        assert_eq!(ok, Ok(7));

        let slow = with_timeout(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(slow, Err(TaskError::TimedOut(Duration::from_millis(10))));
    }

    #[test]
    fn test_new_clamps_to_one() {
        assert_eq!(WorkerPool::new(0).max_concurrency(), 1);
        assert!(default_concurrency() >= 2);
    }
}
