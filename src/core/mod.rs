//! 核心模块
//!
//! 包含核心配置。

pub mod config;

pub use config::{BootSection, CoreConfig, CoreConfigBuilder, LogConfig, ModulesSection};
