//! 启动编排器
//!
//! 按启动计划驱动模块的生命周期：
//!
//! 1. 按计划顺序实例化全部模块（`Discovered -> Loaded`，或 `LoadFailed`）
//! 2. 逐阶段启动：必需依赖未启动的模块直接标记 `DependencyFailed`，其余模块在工作池中
//!    并发启动；每个阶段是一道屏障
//! 3. 关闭时按阶段逆序停止，阶段内并发，任何失败都不会中断其他模块的停止
//!
//! 编排器只使用一次：启动之后的再次启动、关闭之后的再次关闭以及关闭之后的启动
//! 都直接返回当前报告。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::boot::lifecycle::{LifecycleState, ModuleRecord};
use crate::boot::pool::{self, TaskError, WorkerPool};
use crate::boot::report::{BootReport, ConditionKind, FailureCondition, RuntimeState};
use crate::context::event_bus::{Event, RUNTIME_STATE_CHANGED};
use crate::context::RuntimeContext;
use crate::module::descriptor::DescriptorStore;
use crate::module::plan::BootPlan;
use crate::module::registry::{ModuleHandle, ModuleRegistry};
use crate::utils::{CoreError, Result};

/// 事件来源
pub const EVENT_SOURCE: &str = "core";

/// 默认启动时限（毫秒）
pub const DEFAULT_START_TIMEOUT_MS: u64 = 30_000;

/// 默认停止时限（毫秒）
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;

/// 编排器配置
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// 严格模式：出现故障的阶段之后不再启动
    pub strict: bool,
    /// 同时启动 / 停止的模块数上限
    pub max_concurrency: usize,
    /// 默认启动时限
    pub start_timeout: Duration,
    /// 默认停止时限
    pub stop_timeout: Duration,
    /// 按模块覆盖的时限，同时作用于启动和停止
    pub module_timeouts: HashMap<String, Duration>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            strict: false,
            max_concurrency: pool::default_concurrency(),
            start_timeout: Duration::from_millis(DEFAULT_START_TIMEOUT_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            module_timeouts: HashMap::new(),
        }
    }
}

impl BootConfig {
    /// 模块的启动时限
    pub fn start_timeout_for(&self, module_id: &str) -> Duration {
        self.module_timeouts
            .get(module_id)
            .copied()
            .unwrap_or(self.start_timeout)
    }

    /// 模块的停止时限
    pub fn stop_timeout_for(&self, module_id: &str) -> Duration {
        self.module_timeouts
            .get(module_id)
            .copied()
            .unwrap_or(self.stop_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Booted,
    ShutDown,
}

#[derive(Debug)]
struct Outcome {
    state: RuntimeState,
    aborted_by: Option<FailureCondition>,
}

/// 单个模块启动 / 停止的执行结果
type CallOutcome = std::result::Result<std::result::Result<anyhow::Result<()>, TaskError>, TaskError>;

/// 启动编排器
pub struct BootOrchestrator {
    plan: Arc<BootPlan>,
    records: HashMap<String, Arc<ModuleRecord>>,
    registry: Arc<ModuleRegistry>,
    ctx: Arc<RuntimeContext>,
    pool: WorkerPool,
    config: BootConfig,
    phase: Mutex<Phase>,
    outcome: RwLock<Outcome>,
}

impl BootOrchestrator {
    /// 创建编排器
    ///
    /// 计划中的每个模块都必须能在仓库中找到描述符，否则返回 `ModuleNotFound`。
    pub fn new(
        plan: Arc<BootPlan>,
        store: &DescriptorStore,
        registry: Arc<ModuleRegistry>,
        ctx: Arc<RuntimeContext>,
        config: BootConfig,
    ) -> Result<Self> {
        let mut records = HashMap::with_capacity(plan.module_count());
        for (stage, ids) in plan.stages().iter().enumerate() {
            for id in ids {
                let descriptor = store
                    .get(id)
                    .ok_or_else(|| CoreError::ModuleNotFound(id.clone()))?;
                records.insert(
                    id.clone(),
                    Arc::new(ModuleRecord::new(Arc::clone(descriptor), stage)),
                );
            }
        }

        Ok(Self {
            plan,
            records,
            registry,
            ctx,
            pool: WorkerPool::new(config.max_concurrency),
            config,
            phase: Mutex::new(Phase::Idle),
            outcome: RwLock::new(Outcome {
                state: RuntimeState::NotStarted,
                aborted_by: None,
            }),
        })
    }

    /// 启动计划
    pub fn plan(&self) -> &Arc<BootPlan> {
        &self.plan
    }

    /// 运行时上下文
    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// 编排器配置
    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// 运行时聚合状态
    pub async fn state(&self) -> RuntimeState {
        self.outcome.read().await.state
    }

    /// 单个模块的生命周期状态
    pub async fn module_state(&self, module_id: &str) -> Option<LifecycleState> {
        match self.records.get(module_id) {
            Some(record) => Some(record.state().await),
            None => None,
        }
    }

    /// 执行启动
    pub async fn execute_boot(&self, cancel: CancellationToken) -> BootReport {
        let mut phase = self.phase.lock().await;
        if *phase != Phase::Idle {
            debug!(phase = ?*phase, "运行时已启动或已关闭，跳过启动");
            return self.report().await;
        }
        *phase = Phase::Booted;

        info!(
            runtime_id = %self.ctx.runtime_id(),
            modules = self.plan.module_count(),
            stages = self.plan.stage_count(),
            strict = self.config.strict,
            "开始启动模块"
        );

        self.instantiate_all().await;

        let mut aborted_by = None;
        let mut cancelled = false;

        for (stage, ids) in self.plan.stages().iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(stage, "启动被取消，剩余阶段不再启动");
                cancelled = true;
                if let Some(first) = ids.first() {
                    aborted_by = Some(FailureCondition::new(
                        ConditionKind::Cancelled,
                        first,
                        format!("启动在第 {} 阶段之前被取消", stage),
                    ));
                }
                break;
            }

            self.start_stage(stage, ids).await;

            if self.config.strict {
                if let Some(failure) = self.first_failure(ids).await {
                    let root = failure.root().clone();
                    error!(stage, root = %root, "严格模式下出现故障，中止后续阶段");
                    aborted_by = Some(root);
                    break;
                }
            }
        }

        let state = if cancelled {
            RuntimeState::Cancelled
        } else if aborted_by.is_some() {
            RuntimeState::Failed
        } else {
            self.aggregate_state().await
        };
        self.set_outcome(state, aborted_by).await;

        info!(runtime_id = %self.ctx.runtime_id(), state = %state, "模块启动结束");
        self.report().await
    }

    /// 执行关闭
    pub async fn execute_shutdown(&self) -> BootReport {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::ShutDown => {
                debug!("运行时已关闭，跳过关闭");
                return self.report().await;
            }
            Phase::Idle => {
                *phase = Phase::ShutDown;
                info!("运行时尚未启动，直接标记为已关闭");
                self.ctx.scheduler().shutdown();
                self.set_outcome(RuntimeState::Stopped, None).await;
                return self.report().await;
            }
            Phase::Booted => *phase = Phase::ShutDown,
        }

        info!(runtime_id = %self.ctx.runtime_id(), "开始关闭模块");

        for (stage, ids) in self.plan.stages().iter().enumerate().rev() {
            self.stop_stage(stage, ids).await;
        }

        self.ctx.scheduler().shutdown();
        let aborted_by = self.outcome.read().await.aborted_by.clone();
        self.set_outcome(RuntimeState::Stopped, aborted_by).await;

        info!(runtime_id = %self.ctx.runtime_id(), "模块关闭结束");
        self.report().await
    }

    /// 当前报告
    pub async fn report(&self) -> BootReport {
        let mut modules = BTreeMap::new();
        for id in self.plan.modules() {
            if let Some(record) = self.records.get(id) {
                modules.insert(id.to_string(), record.snapshot().await);
            }
        }

        let outcome = self.outcome.read().await;
        BootReport {
            state: outcome.state,
            modules,
            aborted_by: outcome.aborted_by.clone(),
        }
    }

    // ==================== 启动 ====================

    async fn instantiate_all(&self) {
        for id in self.plan.modules() {
            let Some(record) = self.records.get(id) else {
                continue;
            };

            match self.registry.instantiate(record.descriptor(), &self.ctx).await {
                Ok(handle) => {
                    if self.apply(record, record.attach(handle).await) {
                        self.publish_transition(record).await;
                    }
                }
                Err(condition) => self.fail(record, condition).await,
            }
        }
    }

    async fn start_stage(&self, stage: usize, ids: &[String]) {
        let mut starting = Vec::new();

        for id in ids {
            let Some(record) = self.records.get(id) else {
                continue;
            };
            if record.state().await != LifecycleState::Loaded {
                continue;
            }

            if let Some(cause) = self.blocking_failure(id).await {
                warn!(module_id = %id, stage, dependency = %cause.module, "必需依赖未启动");
                self.fail(record, FailureCondition::dependency_failed(id, &cause))
                    .await;
                continue;
            }

            let Some(handle) = record.instance().await else {
                self.fail(
                    record,
                    FailureCondition::new(ConditionKind::StartFailed, id, "模块实例缺失"),
                )
                .await;
                continue;
            };

            if self.apply(record, record.transition(LifecycleState::Starting).await) {
                info!(module_id = %id, stage, "启动模块");
                self.publish_transition(record).await;
                starting.push((Arc::clone(record), handle));
            }
        }

        if starting.is_empty() {
            return;
        }

        let tasks = starting
            .iter()
            .map(|(record, handle)| {
                let timeout = self.config.start_timeout_for(record.id());
                Self::call(Arc::clone(handle), Arc::clone(&self.ctx), timeout, true)
            })
            .collect();
        let results = self.pool.run_all(tasks).await;

        for ((record, _), result) in starting.iter().zip(results) {
            match Self::condition_of(record.id(), result, ConditionKind::StartFailed) {
                None => {
                    if self.apply(record, record.transition(LifecycleState::Started).await) {
                        info!(module_id = %record.id(), stage, "模块已启动");
                        self.publish_transition(record).await;
                    }
                }
                Some(condition) => self.fail(record, condition).await,
            }
        }
    }

    /// 必需依赖中第一个未启动者的故障
    async fn blocking_failure(&self, module_id: &str) -> Option<FailureCondition> {
        for (dependency, required) in self.plan.dependencies_of(module_id) {
            let Some(record) = self.records.get(&dependency) else {
                continue;
            };
            let state = record.state().await;
            if state == LifecycleState::Started {
                continue;
            }

            if !required {
                debug!(
                    module_id = %module_id,
                    dependency = %dependency,
                    state = %state,
                    "可选依赖未启动，继续启动"
                );
                continue;
            }

            let cause = record.condition().await.unwrap_or_else(|| {
                FailureCondition::new(
                    ConditionKind::StartFailed,
                    &dependency,
                    format!("模块处于 {} 状态", state),
                )
            });
            return Some(cause);
        }
        None
    }

    async fn first_failure(&self, ids: &[String]) -> Option<FailureCondition> {
        for id in ids {
            if let Some(record) = self.records.get(id) {
                if let Some(condition) = record.condition().await {
                    return Some(condition);
                }
            }
        }
        None
    }

    async fn aggregate_state(&self) -> RuntimeState {
        let mut started = 0;
        for record in self.records.values() {
            if record.state().await == LifecycleState::Started {
                started += 1;
            }
        }

        if started == self.records.len() {
            RuntimeState::FullyStarted
        } else if started == 0 {
            RuntimeState::Failed
        } else {
            RuntimeState::Degraded
        }
    }

    // ==================== 关闭 ====================

    async fn stop_stage(&self, stage: usize, ids: &[String]) {
        let mut stopping = Vec::new();

        for id in ids {
            let Some(record) = self.records.get(id) else {
                continue;
            };
            if record.state().await != LifecycleState::Started {
                continue;
            }
            let Some(handle) = record.instance().await else {
                continue;
            };

            if self.apply(record, record.transition(LifecycleState::Stopping).await) {
                info!(module_id = %id, stage, "停止模块");
                self.publish_transition(record).await;
                stopping.push((Arc::clone(record), handle));
            }
        }

        if stopping.is_empty() {
            return;
        }

        let tasks = stopping
            .iter()
            .map(|(record, handle)| {
                let timeout = self.config.stop_timeout_for(record.id());
                Self::call(Arc::clone(handle), Arc::clone(&self.ctx), timeout, false)
            })
            .collect();
        let results = self.pool.run_all(tasks).await;

        for ((record, _), result) in stopping.iter().zip(results) {
            match Self::condition_of(record.id(), result, ConditionKind::StopFailed) {
                None => {
                    if self.apply(record, record.transition(LifecycleState::Stopped).await) {
                        info!(module_id = %record.id(), stage, "模块已停止");
                        self.publish_transition(record).await;
                    }
                }
                Some(condition) => self.fail(record, condition).await,
            }
        }
    }

    // ==================== 公共步骤 ====================

    /// 在工作池中调用模块的 `start` 或 `stop`
    async fn call(
        handle: ModuleHandle,
        ctx: Arc<RuntimeContext>,
        timeout: Duration,
        start: bool,
    ) -> std::result::Result<anyhow::Result<()>, TaskError> {
        pool::with_timeout(timeout, async move {
            let mut module = handle.lock().await;
            if start {
                module.start(&ctx).await
            } else {
                module.stop(&ctx).await
            }
        })
        .await
    }

    fn condition_of(module_id: &str, result: CallOutcome, kind: ConditionKind) -> Option<FailureCondition> {
        match result {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(FailureCondition::new(kind, module_id, format!("{:#}", e))),
            Ok(Err(TaskError::TimedOut(limit))) | Err(TaskError::TimedOut(limit)) => {
                Some(FailureCondition::new(
                    ConditionKind::Timeout,
                    module_id,
                    format!("超过时限 {}ms", limit.as_millis()),
                ))
            }
            Ok(Err(e)) | Err(e) => Some(FailureCondition::new(kind, module_id, e.to_string())),
        }
    }

    async fn fail(&self, record: &ModuleRecord, condition: FailureCondition) {
        error!(
            module_id = %record.id(),
            stage = record.stage(),
            condition = %condition,
            "模块失败"
        );
        if self.apply(record, record.fail(condition).await) {
            self.publish_transition(record).await;
        }
    }

    /// 记录非法转换，返回转换是否生效
    fn apply<T>(&self, record: &ModuleRecord, result: Result<T>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                error!(module_id = %record.id(), error = %e, "生命周期状态转换被拒绝");
                false
            }
        }
    }

    async fn publish_transition(&self, record: &ModuleRecord) {
        let snapshot = record.snapshot().await;
        let mut data = json!({
            "module_id": record.id(),
            "stage": snapshot.stage,
            "state": snapshot.state,
        });
        if let Some(condition) = snapshot.condition {
            data["condition"] = json!(condition);
        }

        let topic = format!("module.{}", snapshot.state);
        self.ctx
            .events()
            .emit(Event::new(topic, EVENT_SOURCE, data));
    }

    async fn set_outcome(&self, state: RuntimeState, aborted_by: Option<FailureCondition>) {
        let from = {
            let mut outcome = self.outcome.write().await;
            let from = outcome.state;
            outcome.state = state;
            outcome.aborted_by = aborted_by;
            from
        };

        if from != state {
            info!(from = %from, to = %state, "运行时状态变更");
            self.ctx.events().emit(Event::new(
                RUNTIME_STATE_CHANGED,
                EVENT_SOURCE,
                json!({
                    "runtime_id": self.ctx.runtime_id(),
                    "from": from,
                    "to": state,
                }),
            ));
        }
    }
}

impl std::fmt::Debug for BootOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootOrchestrator")
            .field("runtime_id", &self.ctx.runtime_id())
            .field("stages", &self.plan.stages())
            .field("config", &self.config)
            .finish()
    }
}
