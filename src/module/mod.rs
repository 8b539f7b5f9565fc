//! 模块管理
//!
//! 包含模块发现与依赖解析的核心组件：
//! - `descriptor`: 模块描述符与描述符仓库
//! - `parser`: `module.yaml` 清单解析与校验
//! - `dependency`: 依赖图与依赖解析器
//! - `plan`: 启动计划
//! - `loader`: 模块与加载器接口
//! - `registry`: 模块实例化

pub mod dependency;
pub mod descriptor;
pub mod loader;
pub mod parser;
pub mod plan;
pub mod registry;

// 重导出常用类型
pub use dependency::{DependencyGraph, DependencyResolver};
pub use descriptor::{Dependency, DescriptorStore, ModuleDescriptor, MANIFEST_FILE};
pub use loader::{FnLoader, Module, ModuleLoader, ModuleProviders};
pub use parser::ModuleParser;
pub use plan::BootPlan;
pub use registry::{ModuleHandle, ModuleRegistry};
