//! 模块描述符
//!
//! 描述符是模块的不可变身份：标识、版本、依赖声明，以及负责实例化它的加载器名称。
//! 描述符可以在代码中构造，也可以从 `module.yaml` 清单中读取：
//!
//! ```yaml
//! id: api
//! version: 1.2.0
//! loader: http
//! provides: [http.routes]
//! dependencies:
//!   - module_id: auth
//!     version: ^1.0
//!   - module_id: metrics
//!     required: false
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::module::parser::ModuleParser;
use crate::utils::{CoreError, Result};

/// 模块清单文件名
pub const MANIFEST_FILE: &str = "module.yaml";

/// 依赖声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// 被依赖模块的标识
    pub module_id: String,

    /// 版本要求，缺省为 `*`
    #[serde(default = "default_version_req")]
    pub version: VersionReq,

    /// 是否必需
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_version_req() -> VersionReq {
    VersionReq::STAR
}

fn default_required() -> bool {
    true
}

impl Dependency {
    /// 创建任意版本的必需依赖
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            version: VersionReq::STAR,
            required: true,
        }
    }

    /// 设置版本要求
    pub fn with_version(mut self, req: VersionReq) -> Self {
        self.version = req;
        self
    }

    /// 设置为可选依赖
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// 模块描述符
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识
    pub id: String,

    /// 模块版本
    pub version: Version,

    /// 依赖声明（保持声明顺序）
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// 加载器名称，为空时使用模块标识
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub loader: String,

    /// 模块描述
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// 提供的能力名称
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
}

impl ModuleDescriptor {
    /// 创建描述符，加载器名称默认等于模块标识
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
            dependencies: Vec::new(),
            loader: String::new(),
            description: String::new(),
            provides: Vec::new(),
        }
    }

    /// 追加依赖
    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 指定加载器
    pub fn with_loader(mut self, loader: impl Into<String>) -> Self {
        self.loader = loader.into();
        self
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 声明提供的能力
    pub fn provides(mut self, capability: impl Into<String>) -> Self {
        self.provides.push(capability.into());
        self
    }

    /// 实际使用的加载器名称
    pub fn loader_name(&self) -> &str {
        if self.loader.is_empty() {
            &self.id
        } else {
            &self.loader
        }
    }

    /// 是否提供指定能力
    pub fn provides_capability(&self, capability: &str) -> bool {
        self.provides.iter().any(|c| c == capability)
    }
}

// ==================== 描述符仓库 ====================

/// 描述符仓库
///
/// 按标识排序保存所有已发现的描述符，标识唯一。
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    descriptors: BTreeMap<String, Arc<ModuleDescriptor>>,
}

impl DescriptorStore {
    /// 创建空仓库
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入描述符
    ///
    /// 标识已存在时返回 [`CoreError::DuplicateModule`]，仓库保持不变。
    pub fn insert(&mut self, descriptor: ModuleDescriptor) -> Result<Arc<ModuleDescriptor>> {
        if self.descriptors.contains_key(&descriptor.id) {
            return Err(CoreError::DuplicateModule(descriptor.id));
        }
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .insert(descriptor.id.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// 由一组描述符构建仓库，遇到重复标识即失败
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ModuleDescriptor>,
    ) -> Result<Self> {
        let mut store = Self::new();
        for descriptor in descriptors {
            store.insert(descriptor)?;
        }
        Ok(store)
    }

    /// 按标识查找
    pub fn get(&self, id: &str) -> Option<&Arc<ModuleDescriptor>> {
        self.descriptors.get(id)
    }

    /// 是否包含指定标识
    pub fn contains(&self, id: &str) -> bool {
        self.descriptors.contains_key(id)
    }

    /// 按标识升序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModuleDescriptor>> {
        self.descriptors.values()
    }

    /// 所有标识（升序）
    pub fn ids(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    /// 描述符数量
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// 扫描清单目录
    ///
    /// 在每个目录的直接子目录中查找 `module.yaml`。无法解析的清单记录警告后跳过；
    /// 标识重复则整体失败。`disabled` 中的标识不会被收录。
    pub async fn scan(&mut self, dirs: &[PathBuf], disabled: &[String]) -> Result<usize> {
        let mut added = 0;

        for dir in dirs {
            if !dir.exists() {
                debug!(dir = %dir.display(), "清单目录不存在，跳过");
                continue;
            }

            for manifest in Self::manifest_paths(dir).await? {
                let descriptor = match ModuleParser::parse_file(&manifest).await {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!(path = %manifest.display(), error = %e, "无法解析模块清单，跳过");
                        continue;
                    }
                };

                if disabled.iter().any(|id| id == &descriptor.id) {
                    info!(module_id = %descriptor.id, "模块已被禁用，跳过");
                    continue;
                }

                debug!(module_id = %descriptor.id, path = %manifest.display(), "发现模块");
                self.insert(descriptor)?;
                added += 1;
            }
        }

        info!(count = added, "模块扫描完成");
        Ok(added)
    }

    /// 目录下所有清单路径，按路径排序以保证扫描顺序稳定
    async fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let manifest = entry.path().join(MANIFEST_FILE);
            if entry.file_type().await?.is_dir() && manifest.is_file() {
                paths.push(manifest);
            }
        }

        paths.sort();
        Ok(paths)
    }
}
