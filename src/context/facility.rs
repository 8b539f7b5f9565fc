//! 设施注册表
//!
//! 模块之间共享服务对象的地方，例如网络模块把连接管理器注册为 `net.connections`，
//! 其他模块在启动时按名称取用。
//!
//! 读取是无等待的：读者拿到的是一份不可变快照。写入由互斥锁串行化，每次写入
//! 复制当前快照、修改后整体替换。

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::debug;

type Facility = Arc<dyn Any + Send + Sync>;
type Snapshot = BTreeMap<String, Facility>;

/// 设施注册表
pub struct FacilityRegistry {
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<()>,
}

impl FacilityRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// 注册设施，返回是否替换了同名的旧值
    pub async fn register<T>(&self, name: impl Into<String>, facility: T) -> bool
    where
        T: Any + Send + Sync,
    {
        let name = name.into();
        let _guard = self.writer.lock().await;

        let mut next = Snapshot::clone(&self.snapshot.load());
        let replaced = next.insert(name.clone(), Arc::new(facility)).is_some();
        self.snapshot.store(Arc::new(next));

        debug!(facility = %name, replaced, "注册设施");
        replaced
    }

    /// 移除设施，返回是否存在
    pub async fn remove(&self, name: &str) -> bool {
        let _guard = self.writer.lock().await;

        let mut next = Snapshot::clone(&self.snapshot.load());
        let removed = next.remove(name).is_some();
        if removed {
            self.snapshot.store(Arc::new(next));
            debug!(facility = %name, "移除设施");
        }
        removed
    }

    /// 按名称和类型取用设施，类型不符时返回 `None`
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.snapshot
            .load()
            .get(name)
            .cloned()
            .and_then(|facility| facility.downcast::<T>().ok())
    }

    /// 是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.snapshot.load().contains_key(name)
    }

    /// 所有设施名称（升序）
    pub fn names(&self) -> Vec<String> {
        self.snapshot.load().keys().cloned().collect()
    }
}

impl Default for FacilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FacilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}
