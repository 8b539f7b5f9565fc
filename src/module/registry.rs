//! 模块加载器注册表
//!
//! 把描述符解析为模块实例。每个描述符在运行时的整个生命周期内只会被实例化一次：
//! 成功或失败的结果都按标识缓存，之后的调用直接返回缓存结果。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{error, info};

use crate::boot::pool::panic_message;
use crate::boot::report::{ConditionKind, FailureCondition};
use crate::context::RuntimeContext;
use crate::module::descriptor::ModuleDescriptor;
use crate::module::loader::{Module, ModuleProviders};

/// 共享的模块实例句柄
pub type ModuleHandle = Arc<Mutex<Box<dyn Module>>>;

/// 实例化结果
pub type InstantiateResult = std::result::Result<ModuleHandle, FailureCondition>;

/// 模块加载器注册表
pub struct ModuleRegistry {
    /// 注入的加载器
    providers: ModuleProviders,
    /// 实例缓存：module_id -> 实例化结果
    instances: RwLock<HashMap<String, Arc<OnceCell<InstantiateResult>>>>,
}

impl ModuleRegistry {
    /// 创建注册表
    pub fn new(providers: ModuleProviders) -> Self {
        info!(loaders = providers.len(), "创建模块注册表");
        Self {
            providers,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// 注入的加载器
    pub fn providers(&self) -> &ModuleProviders {
        &self.providers
    }

    /// 实例化模块
    ///
    /// 找不到加载器、加载器返回错误或 panic 时，返回 `LoadFailed` 故障。
    /// 同一标识的并发调用只会触发一次加载。
    pub async fn instantiate(
        &self,
        descriptor: &ModuleDescriptor,
        ctx: &RuntimeContext,
    ) -> InstantiateResult {
        let cell = {
            let mut instances = self.instances.write().await;
            Arc::clone(instances.entry(descriptor.id.clone()).or_default())
        };

        cell.get_or_init(|| self.create(descriptor, ctx))
            .await
            .clone()
    }

    /// 已缓存的实例
    pub async fn instance(&self, module_id: &str) -> Option<ModuleHandle> {
        let instances = self.instances.read().await;
        instances
            .get(module_id)
            .and_then(|cell| cell.get())
            .and_then(|outcome| outcome.as_ref().ok())
            .cloned()
    }

    /// 是否已尝试过实例化
    pub async fn is_instantiated(&self, module_id: &str) -> bool {
        let instances = self.instances.read().await;
        instances
            .get(module_id)
            .is_some_and(|cell| cell.initialized())
    }

    async fn create(&self, descriptor: &ModuleDescriptor, ctx: &RuntimeContext) -> InstantiateResult {
        let loader_name = descriptor.loader_name();
        let fail = |reason: String| {
            error!(module_id = %descriptor.id, loader = %loader_name, reason = %reason, "模块加载失败");
            FailureCondition::new(ConditionKind::LoadFailed, &descriptor.id, reason)
        };

        let Some(loader) = self.providers.get(loader_name) else {
            return Err(fail(format!("找不到加载器 '{}'", loader_name)));
        };

        match AssertUnwindSafe(loader.create(descriptor, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(module)) => {
                info!(module_id = %descriptor.id, loader = %loader_name, "模块已实例化");
                Ok(Arc::new(Mutex::new(module)))
            }
            Ok(Err(e)) => Err(fail(format!("{:#}", e))),
            Err(payload) => Err(fail(format!("加载器崩溃: {}", panic_message(payload)))),
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("providers", &self.providers)
            .finish()
    }
}
