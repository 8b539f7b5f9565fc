//! 核心配置
//!
//! 定义核心的配置结构和加载逻辑。配置文件按扩展名解析：`.json` 为 JSON，其余为 YAML。
//!
//! ```yaml
//! boot:
//!   strict: false
//!   max_concurrency: 8
//!   start_timeout_ms: 30000
//!   stop_timeout_ms: 10000
//!   module_timeouts:
//!     world: 120000
//! logging:
//!   level: info
//!   json_format: false
//! modules:
//!   manifest_dirs: [./modules]
//!   disabled: [metrics]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::boot::orchestrator::{BootConfig, DEFAULT_START_TIMEOUT_MS, DEFAULT_STOP_TIMEOUT_MS};
use crate::boot::pool::default_concurrency;
use crate::utils::{CoreError, Result};

/// 启动配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootSection {
    /// 严格模式：出现故障的阶段之后不再启动
    #[serde(default)]
    pub strict: bool,

    /// 并发上限，缺省为 CPU 核心数 × 2
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// 启动时限（毫秒）
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// 停止时限（毫秒）
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// 按模块覆盖的时限（毫秒）
    #[serde(default)]
    pub module_timeouts: HashMap<String, u64>,
}

fn default_start_timeout_ms() -> u64 {
    DEFAULT_START_TIMEOUT_MS
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

impl Default for BootSection {
    fn default() -> Self {
        Self {
            strict: false,
            max_concurrency: None,
            start_timeout_ms: default_start_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            module_timeouts: HashMap::new(),
        }
    }
}

impl BootSection {
    /// 转换为编排器配置
    pub fn to_boot_config(&self) -> BootConfig {
        BootConfig {
            strict: self.strict,
            max_concurrency: self.max_concurrency.unwrap_or_else(default_concurrency),
            start_timeout: Duration::from_millis(self.start_timeout_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            module_timeouts: self
                .module_timeouts
                .iter()
                .map(|(id, ms)| (id.clone(), Duration::from_millis(*ms)))
                .collect(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_output: false,
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// 模块发现配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesSection {
    /// 清单目录列表，每个子目录放一个 `module.yaml`
    #[serde(default)]
    pub manifest_dirs: Vec<PathBuf>,

    /// 禁用的模块，清单扫描和以编程方式注册的描述符都会跳过
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// 核心配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 启动配置
    #[serde(default)]
    pub boot: BootSection,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块发现配置
    #[serde(default)]
    pub modules: ModulesSection,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl CoreConfig {
    /// 创建配置构建器
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config: CoreConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if self.boot.max_concurrency == Some(0) {
            return Err(CoreError::InvalidConfigValue {
                key: "boot.max_concurrency".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.boot.start_timeout_ms == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "boot.start_timeout_ms".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.boot.stop_timeout_ms == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "boot.stop_timeout_ms".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if let Some((id, _)) = self.boot.module_timeouts.iter().find(|(_, ms)| **ms == 0) {
            return Err(CoreError::InvalidConfigValue {
                key: format!("boot.module_timeouts.{}", id),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.logging.file_output && self.logging.log_dir.is_none() {
            return Err(CoreError::InvalidConfigValue {
                key: "logging.log_dir".to_string(),
                reason: "启用文件日志时必须指定目录".to_string(),
            });
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: CoreConfig) {
        // 只覆盖非默认值的配置
        if other.boot.strict {
            self.boot.strict = true;
        }
        if other.boot.max_concurrency.is_some() {
            self.boot.max_concurrency = other.boot.max_concurrency;
        }
        if other.boot.start_timeout_ms != default_start_timeout_ms() {
            self.boot.start_timeout_ms = other.boot.start_timeout_ms;
        }
        if other.boot.stop_timeout_ms != default_stop_timeout_ms() {
            self.boot.stop_timeout_ms = other.boot.stop_timeout_ms;
        }
        self.boot.module_timeouts.extend(other.boot.module_timeouts);

        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.rotation != default_rotation() {
            self.logging.rotation = other.logging.rotation;
        }

        self.modules.manifest_dirs.extend(other.modules.manifest_dirs);
        for id in other.modules.disabled {
            if !self.modules.disabled.contains(&id) {
                self.modules.disabled.push(id);
            }
        }

        if other.dev_mode {
            self.dev_mode = true;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置配置文件路径
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// 启用严格模式
    pub fn strict(mut self) -> Self {
        self.config.boot.strict = true;
        self
    }

    /// 设置并发上限
    pub fn max_concurrency(mut self, count: usize) -> Self {
        self.config.boot.max_concurrency = Some(count);
        self
    }

    /// 设置启动时限
    pub fn start_timeout_ms(mut self, ms: u64) -> Self {
        self.config.boot.start_timeout_ms = ms;
        self
    }

    /// 设置停止时限
    pub fn stop_timeout_ms(mut self, ms: u64) -> Self {
        self.config.boot.stop_timeout_ms = ms;
        self
    }

    /// 为单个模块设置时限
    pub fn module_timeout_ms(mut self, module_id: impl Into<String>, ms: u64) -> Self {
        self.config.boot.module_timeouts.insert(module_id.into(), ms);
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 添加清单目录
    pub fn manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.manifest_dirs.push(dir.into());
        self
    }

    /// 禁用模块
    pub fn disable(mut self, module_id: impl Into<String>) -> Self {
        self.config.modules.disabled.push(module_id.into());
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> CoreConfig {
        self.config
    }
}
