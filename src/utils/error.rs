//! AsyncMC 核心错误类型定义
//!
//! 发现期与解析期的错误在这里定义。启动期的模块故障不是错误，
//! 而是附着在模块上的 [`FailureCondition`](crate::boot::FailureCondition)。

use thiserror::Error;

/// 核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 发现期错误 ====================

    /// 模块标识重复
    #[error("模块标识重复: '{0}'")]
    DuplicateModule(String),

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 加载器名称重复
    #[error("加载器重复注册: '{0}'")]
    DuplicateLoader(String),

    /// 无效的模块元数据
    #[error("无效的模块元数据: {0}")]
    InvalidMetadata(String),

    // ==================== 解析期错误 ====================

    /// 缺失必需依赖
    #[error("模块 '{module}' 的必需依赖 '{dependency}' 不存在")]
    MissingDependency {
        /// 依赖方
        module: String,
        /// 缺失的依赖
        dependency: String,
    },

    /// 循环依赖
    #[error("检测到循环依赖: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// 闭合的循环路径，首尾相同
        cycle: Vec<String>,
    },

    /// 版本不匹配
    #[error("版本不匹配: 模块 '{module}' 要求 '{dependency}' 满足 {required}, 但找到版本 {found}")]
    VersionMismatch {
        /// 依赖方
        module: String,
        /// 被依赖方
        dependency: String,
        /// 版本要求
        required: String,
        /// 实际版本
        found: String,
    },

    // ==================== 生命周期错误 ====================

    /// 非法的生命周期状态转换
    #[error("模块 '{module}' 不能从 {from} 转换到 {to}")]
    InvalidTransition {
        /// 模块
        module: String,
        /// 当前状态
        from: String,
        /// 目标状态
        to: String,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        /// 配置项
        key: String,
        /// 原因
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 核心操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_DUPLICATE: &str = "MODULE-001";
    pub const MODULE_NOT_FOUND: &str = "MODULE-002";
    pub const MODULE_INVALID_METADATA: &str = "MODULE-003";
    pub const MODULE_MISSING_DEPENDENCY: &str = "MODULE-004";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_VERSION_MISMATCH: &str = "MODULE-006";
    pub const MODULE_DUPLICATE_LOADER: &str = "MODULE-007";
    pub const MODULE_INVALID_TRANSITION: &str = "MODULE-008";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 核心错误 (CORE-xxx)
    pub const CORE_INIT_FAILED: &str = "CORE-001";
    pub const CORE_IO: &str = "CORE-002";
    pub const CORE_SERIALIZATION: &str = "CORE-003";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DuplicateModule(_) => error_code::MODULE_DUPLICATE,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::DuplicateLoader(_) => error_code::MODULE_DUPLICATE_LOADER,
            CoreError::InvalidMetadata(_) | CoreError::VersionParse(_) => {
                error_code::MODULE_INVALID_METADATA
            }
            CoreError::MissingDependency { .. } => error_code::MODULE_MISSING_DEPENDENCY,
            CoreError::CyclicDependency { .. } => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::VersionMismatch { .. } => error_code::MODULE_VERSION_MISMATCH,
            CoreError::InvalidTransition { .. } => error_code::MODULE_INVALID_TRANSITION,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            CoreError::Io(_) => error_code::CORE_IO,
            CoreError::Json(_) | CoreError::Yaml(_) => error_code::CORE_SERIALIZATION,
            CoreError::Other(_) => "UNKNOWN",
        }
    }

    /// 是否为解析期错误（不会产生任何启动计划）
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            CoreError::MissingDependency { .. }
                | CoreError::CyclicDependency { .. }
                | CoreError::VersionMismatch { .. }
        )
    }
}
