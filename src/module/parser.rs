//! 模块清单解析器
//!
//! 负责从 `module.yaml` 解析 [`ModuleDescriptor`] 并做结构校验。版本号与版本要求
//! 的格式由 serde 反序列化时的 semver 类型保证，这里只校验标识与依赖声明本身。

use std::collections::HashSet;
use std::path::Path;

use crate::module::descriptor::ModuleDescriptor;
use crate::utils::{CoreError, Result};

/// 模块清单解析器
#[derive(Debug, Clone, Default)]
pub struct ModuleParser;

impl ModuleParser {
    /// 从文件解析模块描述符
    ///
    /// # Errors
    ///
    /// - 文件无法读取时返回 `Io`
    /// - 内容不是合法 YAML 或版本格式错误时返回 `Yaml`
    /// - 校验失败时返回 `InvalidMetadata`
    pub async fn parse_file(path: &Path) -> Result<ModuleDescriptor> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    /// 从 YAML 字符串解析模块描述符
    pub fn parse_string(content: &str) -> Result<ModuleDescriptor> {
        let descriptor: ModuleDescriptor = serde_yaml::from_str(content)?;
        Self::validate(&descriptor)?;
        Ok(descriptor)
    }

    /// 校验描述符
    ///
    /// 收集全部问题后一次性返回，多条错误以 `; ` 连接。
    pub fn validate(descriptor: &ModuleDescriptor) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !Self::is_valid_module_id(&descriptor.id) {
            errors.push(format!(
                "模块 ID '{}' 格式无效，须以字母开头，只允许字母、数字、下划线和连字符",
                descriptor.id
            ));
        }

        if !descriptor.loader.is_empty() && !Self::is_valid_module_id(&descriptor.loader) {
            errors.push(format!("加载器名称 '{}' 格式无效", descriptor.loader));
        }

        let mut seen = HashSet::new();
        for (index, dep) in descriptor.dependencies.iter().enumerate() {
            if !Self::is_valid_module_id(&dep.module_id) {
                errors.push(format!(
                    "第 {} 个依赖的模块 ID '{}' 格式无效",
                    index + 1,
                    dep.module_id
                ));
            }
            if dep.module_id == descriptor.id {
                errors.push(format!("模块 '{}' 不能依赖自身", descriptor.id));
            }
            if !seen.insert(dep.module_id.as_str()) {
                errors.push(format!("依赖 '{}' 重复声明", dep.module_id));
            }
        }

        for capability in &descriptor.provides {
            if !Self::is_valid_capability(capability) {
                errors.push(format!("无效的能力名称: '{}'", capability));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidMetadata(errors.join("; ")))
        }
    }

    /// 模块 ID：字母开头，只包含字母、数字、下划线和连字符
    pub fn is_valid_module_id(id: &str) -> bool {
        let mut chars = id.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            }
            _ => false,
        }
    }

    /// 能力名称：非空，以点分隔的段，每段只包含字母、数字、下划线和连字符
    fn is_valid_capability(name: &str) -> bool {
        !name.is_empty()
            && name.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            })
    }
}
