//! 事件总线
//!
//! 运行时上下文中的发布订阅通道。编排器在每次生命周期状态转换时投递
//! `module.<state>` 事件，在运行时聚合状态变化时投递 `runtime.state_changed`；
//! 模块也可以在这里发布和订阅自己的事件。
//!
//! [`EventBus::publish`] 等待所有匹配的回调完成；[`EventBus::emit`] 只把事件放入队列，
//! 由后台分发任务按投递顺序逐条分发，调用方不受回调耗时影响。
//!
//! # 使用示例
//!
//! ```rust
//! use asyncmc_core::context::event_bus::{Event, EventBus};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new();
//! let id = bus
//!     .subscribe("monitor", "module.*", Arc::new(|event: Event| {
//!         println!("{} -> {}", event.topic, event.data);
//!     }))
//!     .await;
//!
//! bus.publish(Event::new("module.started", "core", serde_json::json!({"module_id": "net"})))
//!     .await;
//! assert!(bus.unsubscribe(&id).await);
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::utils::{generate_short_id, generate_uuid};

/// 默认订阅者处理超时时间（秒）
const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 5;

/// 运行时状态变化主题
pub const RUNTIME_STATE_CHANGED: &str = "runtime.state_changed";

/// 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识
    pub event_id: String,
    /// 主题（格式: category.name，如 module.started）
    pub topic: String,
    /// 发布方
    pub source: String,
    /// 事件数据
    #[serde(default)]
    pub data: Value,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// 创建新事件
    pub fn new(topic: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: generate_uuid(),
            topic: topic.into(),
            source: source.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// 事件回调
///
/// 回调是同步的，在阻塞线程池中执行，可以被多个线程并发调用。
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Clone)]
struct SubscriptionEntry {
    subscriber_id: String,
    pattern: String,
    callback: EventCallback,
}

/// 匹配主题模式
///
/// - `*` 匹配所有主题
/// - `module.*` 匹配 `module.` 开头且后面非空的主题
/// - 其他情况要求完全相等
pub fn matches_pattern(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(".*") {
        return topic.len() > prefix.len() + 1
            && topic.starts_with(prefix)
            && topic.as_bytes()[prefix.len()] == b'.';
    }

    pattern == topic
}

/// 一次发布的分发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// 回调正常返回
    pub delivered: usize,
    /// 回调 panic
    pub failed: usize,
    /// 回调超时
    pub timeouts: usize,
}

/// 累计分发统计
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// 发布次数
    pub published: u64,
    /// 成功投递次数
    pub delivered: u64,
    /// 失败次数
    pub failed: u64,
    /// 超时次数
    pub timeouts: u64,
    /// 最后一次发布时间
    pub last_publish_at: Option<DateTime<Utc>>,
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    /// 订阅表：订阅 ID -> 订阅条目
    subscriptions: Arc<RwLock<BTreeMap<String, SubscriptionEntry>>>,
    /// 分发统计
    stats: Arc<RwLock<DispatchStats>>,
    /// 单个回调的处理时限
    handler_timeout: Duration,
    /// 后台分发队列，首次投递时创建
    queue: Arc<OnceLock<mpsc::UnboundedSender<Dispatch>>>,
}

/// 分发队列中的条目
enum Dispatch {
    Event(Event),
    Flush(oneshot::Sender<()>),
}

impl EventBus {
    /// 创建事件总线
    pub fn new() -> Self {
        Self::with_handler_timeout(Duration::from_secs(DEFAULT_HANDLER_TIMEOUT_SECS))
    }

    /// 指定回调处理时限
    pub fn with_handler_timeout(handler_timeout: Duration) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(BTreeMap::new())),
            stats: Arc::new(RwLock::new(DispatchStats::default())),
            handler_timeout,
            queue: Arc::new(OnceLock::new()),
        }
    }

    /// 订阅主题模式，返回订阅 ID
    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        pattern: impl Into<String>,
        callback: EventCallback,
    ) -> String {
        let entry = SubscriptionEntry {
            subscriber_id: subscriber_id.into(),
            pattern: pattern.into(),
            callback,
        };
        let subscription_id = generate_short_id();

        debug!(
            subscription_id = %subscription_id,
            subscriber_id = %entry.subscriber_id,
            pattern = %entry.pattern,
            "事件订阅成功"
        );

        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), entry);
        subscription_id
    }

    /// 以通道形式订阅，适合在异步任务中逐条消费事件
    pub async fn subscribe_channel(
        &self,
        subscriber_id: impl Into<String>,
        pattern: impl Into<String>,
    ) -> (String, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .subscribe(
                subscriber_id,
                pattern,
                Arc::new(move |event| {
                    let _ = tx.send(event);
                }),
            )
            .await;
        (id, rx)
    }

    /// 取消订阅，订阅不存在时返回 `false`
    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self.subscriptions.write().await.remove(subscription_id);
        if let Some(ref entry) = removed {
            debug!(
                subscription_id = %subscription_id,
                subscriber_id = %entry.subscriber_id,
                "取消订阅"
            );
        }
        removed.is_some()
    }

    /// 取消某个订阅者的全部订阅，返回取消数量
    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|_, entry| entry.subscriber_id != subscriber_id);
        before - subscriptions.len()
    }

    /// 发布事件并等待所有匹配的回调完成
    ///
    /// 单个回调的 panic 或超时不影响其他回调。
    pub async fn publish(&self, event: Event) -> DispatchSummary {
        let callbacks: Vec<EventCallback> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .values()
                .filter(|entry| matches_pattern(&entry.pattern, &event.topic))
                .map(|entry| Arc::clone(&entry.callback))
                .collect()
        };

        trace!(
            event_id = %event.event_id,
            topic = %event.topic,
            subscribers = callbacks.len(),
            "发布事件"
        );

        let handler_timeout = self.handler_timeout;
        let results = join_all(callbacks.into_iter().map(|callback| {
            let event = event.clone();
            Self::invoke_callback(callback, event, handler_timeout)
        }))
        .await;

        let mut summary = DispatchSummary::default();
        for result in results {
            match result {
                DispatchResult::Delivered => summary.delivered += 1,
                DispatchResult::Failed => summary.failed += 1,
                DispatchResult::Timeout => summary.timeouts += 1,
            }
        }

        if summary.failed > 0 || summary.timeouts > 0 {
            warn!(
                topic = %event.topic,
                failed = summary.failed,
                timeouts = summary.timeouts,
                "部分事件回调未能正常完成"
            );
        }

        let mut stats = self.stats.write().await;
        stats.published += 1;
        stats.delivered += summary.delivered as u64;
        stats.failed += summary.failed as u64;
        stats.timeouts += summary.timeouts as u64;
        stats.last_publish_at = Some(event.timestamp);

        summary
    }

    /// 投递事件，不等待回调
    ///
    /// 事件由后台任务按投递顺序分发。必须在 tokio 运行时中调用，
    /// 运行时之外投递的事件会被丢弃并记录警告。
    pub fn emit(&self, event: Event) {
        let Some(queue) = self.queue() else {
            warn!(topic = %event.topic, "不在 tokio 运行时中，事件被丢弃");
            return;
        };
        if queue.send(Dispatch::Event(event)).is_err() {
            warn!("事件分发任务已退出，事件被丢弃");
        }
    }

    /// 等待此前通过 [`emit`](Self::emit) 投递的事件全部分发完成
    pub async fn flush(&self) {
        let Some(queue) = self.queue.get() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if queue.send(Dispatch::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// 获取分发队列，首次调用时在当前运行时中启动分发任务
    ///
    /// 分发任务只持有订阅表和统计，所有总线句柄释放后队列关闭，任务随之退出。
    fn queue(&self) -> Option<&mpsc::UnboundedSender<Dispatch>> {
        if let Some(queue) = self.queue.get() {
            return Some(queue);
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;

        Some(self.queue.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let worker = EventBus {
                subscriptions: Arc::clone(&self.subscriptions),
                stats: Arc::clone(&self.stats),
                handler_timeout: self.handler_timeout,
                queue: Arc::new(OnceLock::new()),
            };
            handle.spawn(async move {
                while let Some(dispatch) = rx.recv().await {
                    match dispatch {
                        Dispatch::Event(event) => {
                            worker.publish(event).await;
                        }
                        Dispatch::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                trace!("事件分发任务退出");
            });
            tx
        }))
    }

    /// 在阻塞线程中执行同步回调，带超时和 panic 隔离
    async fn invoke_callback(
        callback: EventCallback,
        event: Event,
        handler_timeout: Duration,
    ) -> DispatchResult {
        let task = tokio::task::spawn_blocking(move || {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callback(event)))
        });

        match timeout(handler_timeout, task).await {
            Ok(Ok(Ok(()))) => DispatchResult::Delivered,
            Ok(Ok(Err(_))) | Ok(Err(_)) => DispatchResult::Failed,
            Err(_) => DispatchResult::Timeout,
        }
    }

    /// 当前订阅数量
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// 累计分发统计
    pub async fn stats(&self) -> DispatchStats {
        self.stats.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

enum DispatchResult {
    Delivered,
    Failed,
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("*", "module.started"));
        assert!(matches_pattern("module.*", "module.started"));
        assert!(matches_pattern("module.started", "module.started"));

        assert!(!matches_pattern("module.*", "module."));
        assert!(!matches_pattern("module.*", "modules.started"));
        assert!(!matches_pattern("module.*", "runtime.state_changed"));
        assert!(!matches_pattern("module.started", "module.stopped"));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for pattern in ["module.*", "module.started", "runtime.*"] {
            let hits = Arc::clone(&hits);
            bus.subscribe("test", pattern, Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        }

        let summary = bus
            .publish(Event::new("module.started", "core", Value::Null))
            .await;
        assert_eq!(summary.delivered, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_callback_is_isolated() {
        let bus = EventBus::new();
        bus.subscribe("bad", "*", Arc::new(|_| panic!("订阅者错误"))).await;
        let (_, mut rx) = bus.subscribe_channel("good", "*").await;

        let summary = bus
            .publish(Event::new("runtime.state_changed", "core", Value::Null))
            .await;
        assert_eq!(summary, DispatchSummary { delivered: 1, failed: 1, timeouts: 0 });
        assert_eq!(rx.recv().await.unwrap().topic, "runtime.state_changed");
        assert_eq!(bus.stats().await.failed, 1);
    }

    #[tokio::test]
    async fn test_slow_callback_times_out() {
        let bus = EventBus::with_handler_timeout(Duration::from_millis(20));
        bus.subscribe("slow", "*", Arc::new(|_| {
            std::thread::sleep(Duration::from_millis(200));
        }))
        .await;

        let summary = bus.publish(Event::new("a.b", "core", Value::Null)).await;
        assert_eq!(summary.timeouts, 1);
    }

    #[tokio::test]
    async fn test_emit_does_not_wait_for_callbacks() {
        let bus = EventBus::new();
        bus.subscribe("slow", "module.*", Arc::new(|_| {
            std::thread::sleep(Duration::from_millis(100));
        }))
        .await;
        let (_, mut rx) = bus.subscribe_channel("order", "module.*").await;

        let begin = std::time::Instant::now();
        for topic in ["module.loaded", "module.starting", "module.started"] {
            bus.emit(Event::new(topic, "core", Value::Null));
        }
        assert!(begin.elapsed() < Duration::from_millis(100));

        bus.flush().await;
        let mut topics = Vec::new();
        while let Ok(event) = rx.try_recv() {
            topics.push(event.topic);
        }
        assert_eq!(topics, vec!["module.loaded", "module.starting", "module.started"]);
        assert_eq!(bus.stats().await.published, 3);
    }

    #[tokio::test]
    async fn test_flush_without_emit_returns() {
        let bus = EventBus::new();
        bus.flush().await;
        assert_eq!(bus.stats().await.published, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe("m1", "*", Arc::new(|_| {})).await;
        bus.subscribe("m2", "*", Arc::new(|_| {})).await;
        bus.subscribe("m2", "a.*", Arc::new(|_| {})).await;

        assert!(bus.unsubscribe(&id).await);
        assert!(!bus.unsubscribe(&id).await);
        assert_eq!(bus.unsubscribe_all("m2").await, 2);
        assert_eq!(bus.subscription_count().await, 0);
    }
}
