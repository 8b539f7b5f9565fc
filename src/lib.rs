//! # AsyncMC Core - 服务器核心
//!
//! AsyncMC 服务器运行时的核心组件。外部模块实现 [`ModuleLoader`] 扩展运行时，
//! 核心负责：
//!
//! - **模块发现**: 编程方式注册描述符，或扫描 `module.yaml` 清单
//! - **依赖解析**: 把模块分层为启动阶段，检测缺失依赖、版本冲突与循环依赖
//! - **生命周期编排**: 阶段内并发启动、逆序关闭，故障隔离并生成启动报告
//! - **运行时上下文**: 事件总线、调度句柄与设施注册表
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use asyncmc_core::{CoreConfig, CoreServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::builder().manifest_dir("./modules").build();
//!     let server = CoreServer::builder().config(config).build().await?;
//!
//!     let report = server.boot().await;
//!     println!("运行时状态: {}", report.state);
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 描述符、依赖解析、加载器接口与实例化
//! - `boot` - 生命周期、工作池、编排器与启动报告
//! - `context` - 运行时上下文
//! - `server` - 核心服务
//! - `core` - 核心配置
//! - `utils` - 错误类型、ID 生成与日志

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod boot;
pub mod context;
pub mod core;
pub mod module;
pub mod server;
pub mod utils;

// 重导出常用类型，方便使用
pub use boot::{
    BootConfig, BootOrchestrator, BootReport, ConditionKind, FailureCondition, LifecycleState,
    ModuleReport, RuntimeState,
};
pub use context::{Event, EventBus, FacilityRegistry, RuntimeContext, SchedulerHandle};
pub use module::{
    BootPlan, Dependency, DependencyGraph, DependencyResolver, DescriptorStore, FnLoader, Module,
    ModuleDescriptor, ModuleLoader, ModuleProviders, ModuleRegistry,
};
pub use server::{CoreServer, CoreServerBuilder};

pub use utils::{error_code, generate_short_id, generate_uuid, CoreError, Result};
pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use crate::core::config::{BootSection, CoreConfig, CoreConfigBuilder, LogConfig, ModulesSection};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
