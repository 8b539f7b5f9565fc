//! 模块生命周期
//!
//! ```text
//! Discovered ──> Loaded ──> Starting ──> Started ──> Stopping ──> Stopped
//!     │            │            │                        │
//!     └────────────┴────────────┴──────> Failed <────────┘
//! ```
//!
//! 每个模块对应一条 [`ModuleRecord`]，由编排器的记录表持有。记录自带互斥锁，
//! 所有状态变更都经过 [`LifecycleState::can_transition_to`] 校验。

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::trace;

use crate::boot::report::{FailureCondition, ModuleReport};
use crate::module::descriptor::ModuleDescriptor;
use crate::module::registry::ModuleHandle;
use crate::utils::{CoreError, Result};

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// 已发现，尚未实例化
    #[default]
    Discovered,
    /// 已实例化
    Loaded,
    /// 启动中
    Starting,
    /// 已启动
    Started,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
    /// 失败（终态）
    Failed,
}

impl LifecycleState {
    /// 是否允许转换到目标状态
    pub fn can_transition_to(&self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Discovered, Loaded)
                | (Discovered, Failed)
                | (Loaded, Starting)
                | (Loaded, Failed)
                | (Starting, Started)
                | (Starting, Failed)
                | (Started, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    /// 稳定的字符串形式，同时用作事件主题后缀
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Discovered => "discovered",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== 模块记录 ====================

#[derive(Default)]
struct RecordInner {
    state: LifecycleState,
    condition: Option<FailureCondition>,
    instance: Option<ModuleHandle>,
}

/// 模块记录
pub struct ModuleRecord {
    descriptor: Arc<ModuleDescriptor>,
    stage: usize,
    inner: Mutex<RecordInner>,
}

impl ModuleRecord {
    /// 创建处于 `Discovered` 状态的记录
    pub fn new(descriptor: Arc<ModuleDescriptor>, stage: usize) -> Self {
        Self {
            descriptor,
            stage,
            inner: Mutex::new(RecordInner::default()),
        }
    }

    /// 模块标识
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// 模块描述符
    pub fn descriptor(&self) -> &Arc<ModuleDescriptor> {
        &self.descriptor
    }

    /// 所在阶段
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// 当前状态
    pub async fn state(&self) -> LifecycleState {
        self.inner.lock().await.state
    }

    /// 当前故障
    pub async fn condition(&self) -> Option<FailureCondition> {
        self.inner.lock().await.condition.clone()
    }

    /// 模块实例
    pub async fn instance(&self) -> Option<ModuleHandle> {
        self.inner.lock().await.instance.clone()
    }

    /// 状态转换
    ///
    /// 返回转换前的状态。非法转换返回 [`CoreError::InvalidTransition`]，记录保持不变。
    pub async fn transition(&self, to: LifecycleState) -> Result<LifecycleState> {
        let mut inner = self.inner.lock().await;
        Self::apply(&self.descriptor.id, &mut inner, to)
    }

    /// 附着实例：`Discovered -> Loaded`
    pub async fn attach(&self, instance: ModuleHandle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::apply(&self.descriptor.id, &mut inner, LifecycleState::Loaded)?;
        inner.instance = Some(instance);
        Ok(())
    }

    /// 标记失败并记录故障
    pub async fn fail(&self, condition: FailureCondition) -> Result<LifecycleState> {
        let mut inner = self.inner.lock().await;
        let from = Self::apply(&self.descriptor.id, &mut inner, LifecycleState::Failed)?;
        inner.condition = Some(condition);
        Ok(from)
    }

    /// 当前快照
    pub async fn snapshot(&self) -> ModuleReport {
        let inner = self.inner.lock().await;
        ModuleReport {
            state: inner.state,
            stage: self.stage,
            condition: inner.condition.clone(),
        }
    }

    fn apply(id: &str, inner: &mut RecordInner, to: LifecycleState) -> Result<LifecycleState> {
        let from = inner.state;
        if !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                module: id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        trace!(module_id = %id, from = %from, to = %to, "生命周期状态转换");
        inner.state = to;
        Ok(from)
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.descriptor.id)
            .field("stage", &self.stage)
            .finish()
    }
}
