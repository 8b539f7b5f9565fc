//! 启动结果报告
//!
//! 启动期的模块故障不是 `CoreError`，而是附着在模块上的 [`FailureCondition`]。
//! 编排器在每次启动或关闭后生成一份 [`BootReport`]，可以直接序列化为 JSON。

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::boot::lifecycle::LifecycleState;

/// 故障类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// 加载器缺失、报错或崩溃
    LoadFailed,
    /// 启动逻辑报错或崩溃
    StartFailed,
    /// 停止逻辑报错或崩溃
    StopFailed,
    /// 必需依赖未能启动，模块自身的启动逻辑从未执行
    DependencyFailed,
    /// 启动或停止超时
    Timeout,
    /// 启动被取消
    Cancelled,
}

impl ConditionKind {
    /// 稳定的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::LoadFailed => "load_failed",
            ConditionKind::StartFailed => "start_failed",
            ConditionKind::StopFailed => "stop_failed",
            ConditionKind::DependencyFailed => "dependency_failed",
            ConditionKind::Timeout => "timeout",
            ConditionKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模块故障
///
/// `caused_by` 链从直接原因一直指向根因，例如 `api` 因 `auth` 失败而失败，
/// `auth` 又因 `net` 启动失败而失败。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCondition {
    /// 故障类别
    pub kind: ConditionKind,
    /// 出现故障的模块
    pub module: String,
    /// 故障描述
    pub reason: String,
    /// 上游故障
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Box<FailureCondition>>,
}

impl FailureCondition {
    /// 创建故障
    pub fn new(kind: ConditionKind, module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            module: module.into(),
            reason: reason.into(),
            caused_by: None,
        }
    }

    /// 由上游故障派生 `DependencyFailed`
    pub fn dependency_failed(module: impl Into<String>, cause: &FailureCondition) -> Self {
        Self {
            kind: ConditionKind::DependencyFailed,
            module: module.into(),
            reason: format!("依赖 '{}' 未能启动", cause.module),
            caused_by: Some(Box::new(cause.clone())),
        }
    }

    /// 根因
    pub fn root(&self) -> &FailureCondition {
        let mut current = self;
        while let Some(ref cause) = current.caused_by {
            current = cause;
        }
        current
    }

    /// 因果链长度（包括自身）
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self;
        while let Some(ref cause) = current.caused_by {
            depth += 1;
            current = cause;
        }
        depth
    }
}

impl fmt::Display for FailureCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.module, self.reason)?;
        if let Some(ref cause) = self.caused_by {
            write!(f, " <- {}", cause)?;
        }
        Ok(())
    }
}

// ==================== 运行时状态 ====================

/// 运行时聚合状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// 尚未启动
    NotStarted,
    /// 所有模块均已启动
    FullyStarted,
    /// 部分模块失败，其余已启动
    Degraded,
    /// 启动失败（严格模式下出现故障，或没有任何模块启动成功）
    Failed,
    /// 启动被取消
    Cancelled,
    /// 已关闭
    Stopped,
}

impl RuntimeState {
    /// 稳定的字符串形式
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::NotStarted => "not_started",
            RuntimeState::FullyStarted => "fully_started",
            RuntimeState::Degraded => "degraded",
            RuntimeState::Failed => "failed",
            RuntimeState::Cancelled => "cancelled",
            RuntimeState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== 报告 ====================

/// 单个模块的报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReport {
    /// 生命周期状态
    pub state: LifecycleState,
    /// 所在阶段（从 0 开始）
    pub stage: usize,
    /// 故障，仅当状态为 `Failed` 时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<FailureCondition>,
}

/// 启动 / 关闭报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootReport {
    /// 运行时聚合状态
    pub state: RuntimeState,
    /// 每个模块的报告
    pub modules: BTreeMap<String, ModuleReport>,
    /// 严格模式下中止启动的根因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<FailureCondition>,
}

impl BootReport {
    /// 处于指定状态的模块（升序）
    pub fn modules_in(&self, state: LifecycleState) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, report)| report.state == state)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// 所有故障（按模块升序）
    pub fn failures(&self) -> Vec<&FailureCondition> {
        self.modules
            .values()
            .filter_map(|report| report.condition.as_ref())
            .collect()
    }

    /// 单个模块的状态
    pub fn state_of(&self, module_id: &str) -> Option<LifecycleState> {
        self.modules.get(module_id).map(|report| report.state)
    }

    /// 单个模块的故障
    pub fn condition_of(&self, module_id: &str) -> Option<&FailureCondition> {
        self.modules
            .get(module_id)
            .and_then(|report| report.condition.as_ref())
    }

    /// 是否所有模块都已启动
    pub fn is_fully_started(&self) -> bool {
        self.state == RuntimeState::FullyStarted
    }

    /// 序列化为格式化的 JSON
    pub fn to_json(&self) -> crate::utils::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
