//! 核心服务
//!
//! [`CoreServer`] 把发现、解析、加载、启动和关闭串成一个整体：
//!
//! 1. 收集描述符（编程方式注册 + 扫描清单目录）
//! 2. 解析启动计划
//! 3. 按计划实例化并启动模块
//! 4. 关闭时逆序停止
//!
//! # 示例
//!
//! ```rust,no_run
//! use asyncmc_core::{CoreConfig, CoreServer, FnLoader, Module, ModuleDescriptor, RuntimeContext};
//! use async_trait::async_trait;
//! use semver::Version;
//! use std::sync::Arc;
//!
//! struct Net;
//!
//! #[async_trait]
//! impl Module for Net {
//!     async fn start(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn stop(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = CoreServer::builder()
//!         .config(CoreConfig::default())
//!         .module(
//!             ModuleDescriptor::new("net", Version::new(1, 0, 0)).provides("transport"),
//!             Arc::new(FnLoader::new("net", |_| Ok(Box::new(Net) as Box<dyn Module>))),
//!         )
//!         .build()
//!         .await?;
//!
//!     let report = server.boot().await;
//!     println!("{}", report.to_json()?);
//!     assert_eq!(server.find_modules("transport").await, vec!["net".to_string()]);
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::boot::lifecycle::LifecycleState;
use crate::boot::orchestrator::BootOrchestrator;
use crate::boot::report::{BootReport, RuntimeState};
use crate::context::RuntimeContext;
use crate::core::config::CoreConfig;
use crate::module::dependency::DependencyResolver;
use crate::module::descriptor::{DescriptorStore, ModuleDescriptor};
use crate::module::loader::{ModuleLoader, ModuleProviders};
use crate::module::plan::BootPlan;
use crate::module::registry::ModuleRegistry;
use crate::utils::{CoreError, Result};

/// 核心服务
pub struct CoreServer {
    config: CoreConfig,
    store: DescriptorStore,
    orchestrator: BootOrchestrator,
    cancel: CancellationToken,
    /// 能力查找缓存：capability -> 已启动模块
    capability_cache: RwLock<HashMap<String, Vec<String>>>,
}

impl CoreServer {
    /// 创建构建器
    pub fn builder() -> CoreServerBuilder {
        CoreServerBuilder::default()
    }

    /// 运行时标识
    pub fn runtime_id(&self) -> &str {
        self.orchestrator.context().runtime_id()
    }

    /// 运行时上下文
    pub fn context(&self) -> &Arc<RuntimeContext> {
        self.orchestrator.context()
    }

    /// 启动计划
    pub fn plan(&self) -> &Arc<BootPlan> {
        self.orchestrator.plan()
    }

    /// 已发现的描述符
    pub fn descriptors(&self) -> &DescriptorStore {
        &self.store
    }

    /// 配置
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// 取消令牌，取消后启动在下一个阶段之前停止
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行时聚合状态
    pub async fn state(&self) -> RuntimeState {
        self.orchestrator.state().await
    }

    /// 启动所有模块
    #[instrument(skip(self), fields(runtime_id = %self.runtime_id()))]
    pub async fn boot(&self) -> BootReport {
        self.boot_with(self.cancel.clone()).await
    }

    /// 使用外部取消令牌启动
    #[instrument(skip(self, cancel), fields(runtime_id = %self.runtime_id()))]
    pub async fn boot_with(&self, cancel: CancellationToken) -> BootReport {
        self.invalidate_cache().await;
        let report = self.orchestrator.execute_boot(cancel).await;
        self.invalidate_cache().await;
        report
    }

    /// 停止所有模块
    #[instrument(skip(self), fields(runtime_id = %self.runtime_id()))]
    pub async fn shutdown(&self) -> BootReport {
        self.invalidate_cache().await;
        let report = self.orchestrator.execute_shutdown().await;
        self.invalidate_cache().await;
        report
    }

    /// 当前报告
    pub async fn report(&self) -> BootReport {
        self.orchestrator.report().await
    }

    /// 查找提供某项能力的已启动模块（升序）
    ///
    /// 结果按能力缓存，直到下一次启动或关闭。
    pub async fn find_modules(&self, capability: &str) -> Vec<String> {
        if let Some(cached) = self.capability_cache.read().await.get(capability) {
            return cached.clone();
        }

        let mut found = Vec::new();
        for descriptor in self.store.iter() {
            if !descriptor.provides_capability(capability) {
                continue;
            }
            if self.orchestrator.module_state(&descriptor.id).await == Some(LifecycleState::Started) {
                found.push(descriptor.id.clone());
            }
        }

        debug!(capability, modules = found.len(), "能力查找");
        self.capability_cache
            .write()
            .await
            .insert(capability.to_string(), found.clone());
        found
    }

    async fn invalidate_cache(&self) {
        self.capability_cache.write().await.clear();
    }
}

impl std::fmt::Debug for CoreServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreServer")
            .field("modules", &self.store.len())
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

// ==================== 构建器 ====================

/// 核心服务构建器
#[derive(Default)]
pub struct CoreServerBuilder {
    config: CoreConfig,
    descriptors: Vec<ModuleDescriptor>,
    loaders: Vec<Arc<dyn ModuleLoader>>,
}

impl CoreServerBuilder {
    /// 设置配置
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// 注册模块及其加载器
    ///
    /// 描述符的 `loader` 字段被设为加载器名称。同一个加载器可以服务多个模块。
    pub fn module(mut self, descriptor: ModuleDescriptor, loader: Arc<dyn ModuleLoader>) -> Self {
        self.descriptors
            .push(descriptor.with_loader(loader.name().to_string()));
        self.loaders.push(loader);
        self
    }

    /// 只注册描述符，加载器通过 [`loader`](Self::loader) 单独注入
    pub fn descriptor(mut self, descriptor: ModuleDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// 注入加载器
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// 构建服务
    ///
    /// 扫描配置中的清单目录并解析启动计划。`modules.disabled` 中的标识同时作用于
    /// 清单和以编程方式注册的描述符。重复的模块标识、重名的不同加载器
    /// 以及依赖解析错误都在这里返回。
    pub async fn build(self) -> Result<CoreServer> {
        self.config.validate()?;

        let mut providers = ModuleProviders::new();
        for loader in self.loaders {
            match providers.get(loader.name()) {
                Some(existing) if Arc::ptr_eq(&existing, &loader) => continue,
                Some(_) => return Err(CoreError::DuplicateLoader(loader.name().to_string())),
                None => providers.register(loader)?,
            }
        }

        let disabled = &self.config.modules.disabled;
        let (descriptors, skipped): (Vec<_>, Vec<_>) = self
            .descriptors
            .into_iter()
            .partition(|descriptor| !disabled.contains(&descriptor.id));
        for descriptor in &skipped {
            debug!(module_id = %descriptor.id, "模块已禁用，跳过");
        }

        let mut store = DescriptorStore::from_descriptors(descriptors)?;
        store
            .scan(&self.config.modules.manifest_dirs, &self.config.modules.disabled)
            .await?;

        let plan = Arc::new(DependencyResolver::resolve(&store)?);
        let ctx = Arc::new(RuntimeContext::new());
        let registry = Arc::new(ModuleRegistry::new(providers));
        let orchestrator = BootOrchestrator::new(
            plan,
            &store,
            registry,
            ctx,
            self.config.boot.to_boot_config(),
        )?;

        info!(
            runtime_id = %orchestrator.context().runtime_id(),
            modules = store.len(),
            stages = orchestrator.plan().stage_count(),
            "核心服务已创建"
        );

        Ok(CoreServer {
            config: self.config,
            store,
            orchestrator,
            cancel: CancellationToken::new(),
            capability_cache: RwLock::new(HashMap::new()),
        })
    }
}
