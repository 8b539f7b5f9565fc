//! 启动计划
//!
//! [`BootPlan`] 是解析器的产物：有序的阶段列表，外加丢弃缺失可选依赖之后的有效依赖图。
//! 计划一旦生成就不可变，编排器以 `Arc<BootPlan>` 共享它。

use serde::Serialize;

use crate::module::dependency::DependencyGraph;

/// 启动计划
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootPlan {
    stages: Vec<Vec<String>>,
    #[serde(rename = "dependencies")]
    graph: DependencyGraph,
}

impl BootPlan {
    /// 由阶段列表与有效依赖图创建计划
    pub(crate) fn new(stages: Vec<Vec<String>>, graph: DependencyGraph) -> Self {
        Self { stages, graph }
    }

    /// 阶段列表，阶段内按字典序排列
    pub fn stages(&self) -> &[Vec<String>] {
        &self.stages
    }

    /// 阶段数量
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// 模块总数
    pub fn module_count(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    /// 按启动顺序遍历所有模块
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().flatten().map(String::as_str)
    }

    /// 模块所在阶段（从 0 开始）
    pub fn stage_of(&self, module_id: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.iter().any(|id| id == module_id))
    }

    /// 有效依赖（升序），附带是否必需
    pub fn dependencies_of(&self, module_id: &str) -> Vec<(String, bool)> {
        self.graph.dependencies(module_id)
    }

    /// 直接或间接依赖该模块的模块
    pub fn transitive_dependents(&self, module_id: &str) -> Vec<String> {
        self.graph.transitive_dependents(module_id)
    }

    /// 有效依赖图
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
}
