//! 运行时上下文
//!
//! 每个运行时一份，以 `Arc` 共享给所有模块。模块在 `start` / `stop` 中通过它：
//! - 发布与订阅事件（[`EventBus`]）
//! - 生成后台任务（[`SchedulerHandle`]）
//! - 注册与取用共享设施（[`FacilityRegistry`]）

pub mod event_bus;
pub mod facility;
pub mod scheduler;

pub use event_bus::{DispatchStats, DispatchSummary, Event, EventBus, EventCallback};
pub use facility::FacilityRegistry;
pub use scheduler::SchedulerHandle;

use std::time::Duration;

use tracing::info;

use crate::utils::generate_uuid;

/// 运行时上下文
#[derive(Debug)]
pub struct RuntimeContext {
    runtime_id: String,
    events: EventBus,
    scheduler: SchedulerHandle,
    facilities: FacilityRegistry,
}

impl RuntimeContext {
    /// 在当前 tokio 运行时上创建上下文
    pub fn new() -> Self {
        Self::with_event_bus(EventBus::new())
    }

    /// 指定事件处理超时
    pub fn with_handler_timeout(handler_timeout: Duration) -> Self {
        Self::with_event_bus(EventBus::with_handler_timeout(handler_timeout))
    }

    fn with_event_bus(events: EventBus) -> Self {
        let runtime_id = generate_uuid();
        info!(runtime_id = %runtime_id, "创建运行时上下文");
        Self {
            runtime_id,
            events,
            scheduler: SchedulerHandle::current(),
            facilities: FacilityRegistry::new(),
        }
    }

    /// 运行时标识（UUID）
    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    /// 事件总线
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// 调度句柄
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// 设施注册表
    pub fn facilities(&self) -> &FacilityRegistry {
        &self.facilities
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}
