//! 日志系统模块
//!
//! 基于 tracing 生态：
//!
//! - 多级别日志，`RUST_LOG` 优先于配置中的级别
//! - 结构化输出（文本或 JSON）
//! - 控制台与文件输出均为异步非阻塞写入
//! - 文件按时间轮转
//!
//! # 示例
//!
//! ```rust,no_run
//! use asyncmc_core::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs")
//!         .rotation(RotationStrategy::Hourly)
//!         .build();
//!
//!     let _guard = Logger::init(config)?;
//!     tracing::info!(module_id = "net", stage = 1, "模块已启动");
//!     Ok(())
//! }
//! ```

use crate::utils::{CoreError, Result};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// 默认日志文件名前缀
pub const DEFAULT_FILE_PREFIX: &str = "asyncmc-core";

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从配置字符串解析，无法识别时回退为每天轮转
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationStrategy::Never => write!(f, "never"),
            RotationStrategy::Hourly => write!(f, "hourly"),
            RotationStrategy::Daily => write!(f, "daily"),
        }
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别（"trace" / "debug" / "info" / "warn" / "error"）
    pub level: String,
    /// 是否使用 JSON 格式输出
    pub json_format: bool,
    /// 是否输出到控制台
    pub console_output: bool,
    /// 文件输出目录，`None` 表示不写文件
    pub file_output: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 日志轮转策略
    pub rotation: RotationStrategy,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 是否启用 ANSI 颜色（仅控制台文本输出）
    pub ansi_colors: bool,
    /// 额外的 EnvFilter 指令，例如 "asyncmc_core::boot=trace"
    pub filter_directives: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            rotation: RotationStrategy::Daily,
            show_target: true,
            ansi_colors: true,
            filter_directives: None,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从核心配置的日志段创建
    pub fn from_log_config(log_config: &crate::core::config::LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::parse(&log_config.rotation),
            ..Default::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 启用 JSON 格式输出
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 设置控制台输出
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置日志文件前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 显示目标模块
    pub fn show_target(mut self, enable: bool) -> Self {
        self.config.show_target = enable;
        self
    }

    /// 启用 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 设置额外过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志系统守卫
///
/// 持有非阻塞写入器的 `WorkerGuard`，丢弃时刷新所有挂起的日志。
#[derive(Default)]
pub struct LogGuard {
    guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// 持有的写入器数量
    pub fn writer_count(&self) -> usize {
        self.guards.len()
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化全局日志系统
    ///
    /// 返回的 [`LogGuard`] 必须保持存活直到进程退出。重复初始化返回
    /// [`CoreError::InitFailed`]。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let env_filter = Self::create_env_filter(&config)?;
        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, worker) = tracing_appender::non_blocking(io::stdout());
            guard.guards.push(worker);
            layers.push(Self::build_layer(&config, writer, config.ansi_colors));
        }

        if let Some(ref log_dir) = config.file_output {
            let appender = RollingFileAppender::new(
                config.rotation.to_rotation(),
                log_dir,
                format!("{}.log", config.file_prefix),
            );
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard.guards.push(worker);
            layers.push(Self::build_layer(&config, writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 尝试初始化日志系统，已初始化或失败时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    fn build_layer<W>(config: &LoggerConfig, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        if config.json_format {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_ansi(ansi)
                .boxed()
        }
    }

    fn create_env_filter(config: &LoggerConfig) -> Result<EnvFilter> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .map_err(|e| CoreError::InvalidConfigValue {
                key: "logging.level".to_string(),
                reason: e.to_string(),
            })?;

        let Some(ref directives) = config.filter_directives else {
            return Ok(filter);
        };

        directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .try_fold(filter, |f, directive| {
                directive
                    .parse()
                    .map(|d| f.add_directive(d))
                    .map_err(|e| CoreError::InvalidConfigValue {
                        key: "logging.filter_directives".to_string(),
                        reason: format!("{}: {}", directive, e),
                    })
            })
    }
}

// ============================================================================
// 结构化日志字段定义
// ============================================================================

/// 标准日志字段名称
pub mod fields {
    /// 运行时实例 ID
    pub const RUNTIME_ID: &str = "runtime_id";
    /// 模块 ID
    pub const MODULE_ID: &str = "module_id";
    /// 加载器名称
    pub const LOADER: &str = "loader";
    /// 启动阶段序号（从 1 开始）
    pub const STAGE: &str = "stage";
    /// 生命周期状态
    pub const STATE: &str = "state";
    /// 故障类别
    pub const CONDITION: &str = "condition";
    /// 错误码
    pub const ERROR_CODE: &str = "error_code";
    /// 耗时（毫秒）
    pub const DURATION_MS: &str = "duration_ms";
}
