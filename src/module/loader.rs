//! 模块加载器接口
//!
//! 外部模块通过实现 [`ModuleLoader`] 扩展运行时：加载器按描述符创建 [`Module`] 实例，
//! 编排器随后在各自的阶段调用实例的 `start` / `stop`。一个加载器可以服务多个描述符。
//!
//! # 示例
//!
//! ```rust
//! use asyncmc_core::context::RuntimeContext;
//! use asyncmc_core::module::loader::{FnLoader, Module};
//! use async_trait::async_trait;
//!
//! struct Heartbeat;
//!
//! #[async_trait]
//! impl Module for Heartbeat {
//!     async fn start(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn stop(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let loader = FnLoader::new("heartbeat", |_descriptor| Ok(Box::new(Heartbeat) as Box<dyn Module>));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RuntimeContext;
use crate::module::descriptor::ModuleDescriptor;
use crate::utils::{CoreError, Result};

/// 模块实例
///
/// `start` 与 `stop` 各自至多被调用一次，调用顺序由启动计划决定。
#[async_trait]
pub trait Module: Send + 'static {
    /// 启动模块
    async fn start(&mut self, ctx: &RuntimeContext) -> anyhow::Result<()>;

    /// 停止模块
    async fn stop(&mut self, ctx: &RuntimeContext) -> anyhow::Result<()>;
}

/// 模块加载器
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// 加载器名称，与描述符的 `loader` 字段对应
    fn name(&self) -> &str;

    /// 为描述符创建模块实例
    async fn create(
        &self,
        descriptor: &ModuleDescriptor,
        ctx: &RuntimeContext,
    ) -> anyhow::Result<Box<dyn Module>>;
}

type CreateFn = dyn Fn(&ModuleDescriptor) -> anyhow::Result<Box<dyn Module>> + Send + Sync;

/// 基于闭包的加载器
pub struct FnLoader {
    name: String,
    create: Box<CreateFn>,
}

impl FnLoader {
    /// 创建闭包加载器
    pub fn new<F>(name: impl Into<String>, create: F) -> Self
    where
        F: Fn(&ModuleDescriptor) -> anyhow::Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            create: Box::new(create),
        }
    }
}

impl fmt::Debug for FnLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLoader").field("name", &self.name).finish()
    }
}

#[async_trait]
impl ModuleLoader for FnLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(
        &self,
        descriptor: &ModuleDescriptor,
        _ctx: &RuntimeContext,
    ) -> anyhow::Result<Box<dyn Module>> {
        (self.create)(descriptor)
    }
}

// ==================== 加载器集合 ====================

/// 注入的加载器集合，按名称索引
#[derive(Clone, Default)]
pub struct ModuleProviders {
    loaders: BTreeMap<String, Arc<dyn ModuleLoader>>,
}

impl ModuleProviders {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册加载器，名称重复时返回 [`CoreError::DuplicateLoader`]
    pub fn register(&mut self, loader: Arc<dyn ModuleLoader>) -> Result<()> {
        let name = loader.name().to_string();
        if self.loaders.contains_key(&name) {
            return Err(CoreError::DuplicateLoader(name));
        }
        self.loaders.insert(name, loader);
        Ok(())
    }

    /// 按名称查找加载器
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleLoader>> {
        self.loaders.get(name).cloned()
    }

    /// 所有加载器名称（升序）
    pub fn names(&self) -> Vec<&str> {
        self.loaders.keys().map(String::as_str).collect()
    }

    /// 加载器数量
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl fmt::Debug for ModuleProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleProviders")
            .field("loaders", &self.names())
            .finish()
    }
}
