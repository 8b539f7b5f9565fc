//! 模块依赖管理
//!
//! 本模块提供依赖关系图与启动计划解析器。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，边从依赖方指向被依赖方，并标记是否必需
//! - [`DependencyResolver`] - 把描述符仓库解析为分阶段的 [`BootPlan`]
//!
//! # 示例
//!
//! ```rust
//! use asyncmc_core::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency("auth", "net", true);
//! graph.add_dependency("api", "auth", true);
//! graph.add_dependency("api", "net", true);
//!
//! assert_eq!(
//!     graph.layers().unwrap(),
//!     vec![vec!["net".to_string()], vec!["auth".to_string()], vec!["api".to_string()]]
//! );
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::module::descriptor::DescriptorStore;
use crate::module::plan::BootPlan;
use crate::utils::{CoreError, Result};

/// 模块依赖关系图
///
/// 节点与边都保存在有序映射中，遍历顺序即标识的字典序。
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyGraph {
    /// 正向边：模块 ID -> (依赖 ID -> 是否必需)
    edges: BTreeMap<String, BTreeMap<String, bool>>,
    /// 反向边：模块 ID -> 依赖它的模块
    #[serde(skip)]
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// 创建空图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点，已存在时不做任何事
    pub fn add_module(&mut self, module_id: &str) {
        if !self.edges.contains_key(module_id) {
            self.edges.insert(module_id.to_string(), BTreeMap::new());
            self.reverse_edges
                .insert(module_id.to_string(), BTreeSet::new());
        }
    }

    /// 添加依赖边：`module_id` 依赖 `dependency_id`
    ///
    /// 两端节点不存在时自动添加。同一条边重复添加时，只要有一次是必需的，边就是必需的。
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str, required: bool) {
        self.add_module(module_id);
        self.add_module(dependency_id);

        if let Some(deps) = self.edges.get_mut(module_id) {
            let entry = deps.entry(dependency_id.to_string()).or_insert(false);
            *entry |= required;
        }
        if let Some(dependents) = self.reverse_edges.get_mut(dependency_id) {
            dependents.insert(module_id.to_string());
        }
    }

    /// 直接依赖（升序），附带是否必需
    pub fn dependencies(&self, module_id: &str) -> Vec<(String, bool)> {
        self.edges
            .get(module_id)
            .map(|deps| deps.iter().map(|(id, req)| (id.clone(), *req)).collect())
            .unwrap_or_default()
    }

    /// 直接依赖方（升序）
    pub fn dependents(&self, module_id: &str) -> Vec<String> {
        self.reverse_edges
            .get(module_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 所有直接或间接依赖该模块的模块（升序，不含自身）
    pub fn transitive_dependents(&self, module_id: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([module_id]);

        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.reverse_edges.get(current) {
                for dependent in dependents {
                    if dependent != module_id && found.insert(dependent.clone()) {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        found.into_iter().collect()
    }

    /// 是否包含节点
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.edges.contains_key(module_id)
    }

    /// 节点数量
    pub fn module_count(&self) -> usize {
        self.edges.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 查找最短循环
    ///
    /// 按字典序依次尝试每个节点，返回第一个经过它的最短循环，路径首尾相同。
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let all: BTreeSet<&str> = self.edges.keys().map(String::as_str).collect();
        self.find_cycle_within(&all)
    }

    fn find_cycle_within(&self, nodes: &BTreeSet<&str>) -> Option<Vec<String>> {
        nodes
            .iter()
            .find_map(|start| self.shortest_cycle_through(start, nodes))
    }

    /// 从 `start` 出发做广度优先搜索，找到回到 `start` 的最短路径
    fn shortest_cycle_through(&self, start: &str, nodes: &BTreeSet<&str>) -> Option<Vec<String>> {
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let Some(deps) = self.edges.get(current) else {
                continue;
            };
            for next in deps.keys().map(String::as_str) {
                if !nodes.contains(next) {
                    continue;
                }
                if next == start {
                    let mut path = vec![start.to_string()];
                    let mut cursor = current;
                    while cursor != start {
                        path.push(cursor.to_string());
                        cursor = parent.get(cursor).copied().unwrap_or(start);
                    }
                    path.push(start.to_string());
                    path.reverse();
                    return Some(path);
                }
                if !parent.contains_key(next) {
                    parent.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        None
    }

    /// 分层拓扑排序（Kahn 算法）
    ///
    /// 每一层由当前所有依赖都已出现在更早层中的模块组成，层内按字典序排列。
    ///
    /// # 错误
    ///
    /// 存在循环依赖时返回 [`CoreError::CyclicDependency`]，附带一个最短循环。
    pub fn layers(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut layers = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            let mut next = Vec::new();
            for &id in &ready {
                in_degree.remove(id);
                for dependent in self.reverse_edges.get(id).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent.as_str());
                        }
                    }
                }
            }

            placed += ready.len();
            layers.push(ready.iter().map(|id| id.to_string()).collect());
            next.sort_unstable();
            ready = next;
        }

        if placed < self.edges.len() {
            let remaining: BTreeSet<&str> = in_degree.keys().copied().collect();
            let cycle = self
                .find_cycle_within(&remaining)
                .unwrap_or_else(|| remaining.iter().map(|id| id.to_string()).collect());
            return Err(CoreError::CyclicDependency { cycle });
        }

        Ok(layers)
    }
}

// ==================== 依赖解析器 ====================

/// 依赖解析器
///
/// 纯函数式：同样的描述符仓库总是得到同样的计划或同样的错误。
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// 解析启动计划
    ///
    /// # 错误
    ///
    /// - `MissingDependency` - 必需依赖不在仓库中
    /// - `VersionMismatch` - 必需依赖的版本不满足要求
    /// - `CyclicDependency` - 依赖关系成环
    ///
    /// 缺失或版本不满足的可选依赖不会报错，对应的边被丢弃。
    pub fn resolve(store: &DescriptorStore) -> Result<BootPlan> {
        let graph = Self::build_graph(store)?;
        let stages = graph.layers()?;

        info!(
            modules = graph.module_count(),
            stages = stages.len(),
            "依赖解析完成"
        );
        Ok(BootPlan::new(stages, graph))
    }

    /// 由仓库构建依赖图，同时做存在性与版本检查
    pub fn build_graph(store: &DescriptorStore) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();

        for descriptor in store.iter() {
            graph.add_module(&descriptor.id);

            for dep in &descriptor.dependencies {
                let Some(target) = store.get(&dep.module_id) else {
                    if dep.required {
                        return Err(CoreError::MissingDependency {
                            module: descriptor.id.clone(),
                            dependency: dep.module_id.clone(),
                        });
                    }
                    debug!(
                        module_id = %descriptor.id,
                        dependency = %dep.module_id,
                        "可选依赖不存在，忽略该依赖"
                    );
                    continue;
                };

                if !dep.version.matches(&target.version) {
                    if dep.required {
                        return Err(CoreError::VersionMismatch {
                            module: descriptor.id.clone(),
                            dependency: dep.module_id.clone(),
                            required: dep.version.to_string(),
                            found: target.version.to_string(),
                        });
                    }
                    warn!(
                        module_id = %descriptor.id,
                        dependency = %dep.module_id,
                        required = %dep.version,
                        found = %target.version,
                        "可选依赖版本不满足要求，忽略该依赖"
                    );
                    continue;
                }

                graph.add_dependency(&descriptor.id, &dep.module_id, dep.required);
            }
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::{Dependency, ModuleDescriptor};
    use semver::{Version, VersionReq};

    /// 创建测试用的描述符，依赖均为必需
    fn create_test_module(id: &str, version: &str, deps: &[&str]) -> ModuleDescriptor {
        deps.iter().fold(
            ModuleDescriptor::new(id, Version::parse(version).unwrap()),
            |d, dep| d.depends_on(Dependency::new(*dep)),
        )
    }

    fn store_of(modules: Vec<ModuleDescriptor>) -> DescriptorStore {
        DescriptorStore::from_descriptors(modules).unwrap()
    }

    // ==================== DependencyGraph 测试 ====================

    #[test]
    fn test_add_dependency_merges_required_flag() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "b", false);
        graph.add_dependency("a", "b", true);

        assert_eq!(graph.dependencies("a"), vec![("b".to_string(), true)]);
        assert_eq!(graph.dependents("b"), vec!["a"]);
        assert_eq!(graph.module_count(), 2);
    }

    #[test]
    fn test_transitive_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("auth", "net", true);
        graph.add_dependency("api", "auth", true);
        graph.add_dependency("chat", "api", false);
        graph.add_module("world");

        assert_eq!(graph.transitive_dependents("net"), vec!["api", "auth", "chat"]);
        assert!(graph.transitive_dependents("world").is_empty());
    }

    #[test]
    fn test_find_cycle_prefers_shortest() {
        let mut graph = DependencyGraph::new();
        // a -> b -> c -> a 以及更短的 a -> c -> a
        graph.add_dependency("a", "b", true);
        graph.add_dependency("b", "c", true);
        graph.add_dependency("c", "a", true);
        graph.add_dependency("a", "c", true);

        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "c", "a"]);
    }

    #[test]
    fn test_find_cycle_skips_nodes_outside_cycle() {
        let mut graph = DependencyGraph::new();
        // "a" 只是依赖了环，本身不在环上
        graph.add_dependency("a", "x", true);
        graph.add_dependency("x", "y", true);
        graph.add_dependency("y", "x", true);

        assert_eq!(graph.find_cycle().unwrap(), vec!["x", "y", "x"]);
        let err = graph.layers().unwrap_err();
        assert!(matches!(err, CoreError::CyclicDependency { ref cycle } if cycle == &["x", "y", "x"]));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", "a", true);
        assert_eq!(graph.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_layers_sorted_within_stage() {
        let mut graph = DependencyGraph::new();
        for id in ["zeta", "alpha", "mid"] {
            graph.add_dependency(id, "core", true);
        }

        let layers = graph.layers().unwrap();
        assert_eq!(layers[0], vec!["core"]);
        assert_eq!(layers[1], vec!["alpha", "mid", "zeta"]);
    }

    // ==================== DependencyResolver 测试 ====================

    #[test]
    fn test_resolve_reference_example() {
        let store = store_of(vec![
            create_test_module("net", "1.0.0", &[]),
            create_test_module("auth", "1.0.0", &["net"]),
            create_test_module("api", "1.0.0", &["auth", "net"]),
        ]);

        let plan = DependencyResolver::resolve(&store).unwrap();
        assert_eq!(plan.stages(), &[vec!["net"], vec!["auth"], vec!["api"]]);
    }

    #[test]
    fn test_resolve_missing_required() {
        let store = store_of(vec![create_test_module("auth", "1.0.0", &["net"])]);

        let err = DependencyResolver::resolve(&store).unwrap_err();
        assert!(matches!(
            err,
            CoreError::MissingDependency { ref module, ref dependency }
                if module == "auth" && dependency == "net"
        ));
    }

    #[test]
    fn test_resolve_missing_optional_drops_edge() {
        let store = store_of(vec![ModuleDescriptor::new("chat", Version::new(1, 0, 0))
            .depends_on(Dependency::new("metrics").optional())]);

        let plan = DependencyResolver::resolve(&store).unwrap();
        assert_eq!(plan.stages(), &[vec!["chat"]]);
        assert!(plan.dependencies_of("chat").is_empty());
    }

    #[test]
    fn test_resolve_version_mismatch() {
        let store = store_of(vec![
            create_test_module("net", "1.4.0", &[]),
            ModuleDescriptor::new("auth", Version::new(1, 0, 0)).depends_on(
                Dependency::new("net").with_version(VersionReq::parse("^2.0").unwrap()),
            ),
        ]);

        let err = DependencyResolver::resolve(&store).unwrap_err();
        match err {
            CoreError::VersionMismatch { module, dependency, required, found } => {
                assert_eq!(module, "auth");
                assert_eq!(dependency, "net");
                assert_eq!(required, "^2.0");
                assert_eq!(found, "1.4.0");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_optional_version_mismatch_dropped() {
        let store = store_of(vec![
            create_test_module("metrics", "0.1.0", &[]),
            ModuleDescriptor::new("chat", Version::new(1, 0, 0)).depends_on(
                Dependency::new("metrics")
                    .with_version(VersionReq::parse(">=1.0").unwrap())
                    .optional(),
            ),
        ]);

        let plan = DependencyResolver::resolve(&store).unwrap();
        assert_eq!(plan.stages(), &[vec!["chat", "metrics"]]);
    }

    #[test]
    fn test_resolve_two_node_cycle() {
        let store = store_of(vec![
            create_test_module("a", "1.0.0", &["b"]),
            create_test_module("b", "1.0.0", &["a"]),
        ]);

        let err = DependencyResolver::resolve(&store).unwrap_err();
        assert_eq!(err.to_string(), "检测到循环依赖: a -> b -> a");
    }

    #[test]
    fn test_resolve_empty_store() {
        let plan = DependencyResolver::resolve(&DescriptorStore::new()).unwrap();
        assert_eq!(plan.stage_count(), 0);
    }
}
