//! 启动系统
//!
//! - `lifecycle`: 生命周期状态机与模块记录
//! - `pool`: 有界工作池
//! - `report`: 故障与启动报告
//! - `orchestrator`: 按启动计划启动与关闭模块

pub mod lifecycle;
pub mod orchestrator;
pub mod pool;
pub mod report;

pub use lifecycle::{LifecycleState, ModuleRecord};
pub use orchestrator::{BootConfig, BootOrchestrator};
pub use pool::{TaskError, WorkerPool};
pub use report::{BootReport, ConditionKind, FailureCondition, ModuleReport, RuntimeState};
