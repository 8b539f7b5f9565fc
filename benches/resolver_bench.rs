//! 依赖解析与启动性能基准测试
//!
//! 使用 Criterion 框架进行性能测试，包括：
//! - 不同规模依赖图的解析
//! - 宽图（单阶段大量模块）与深图（长依赖链）的解析
//! - 完整启动 / 关闭流程

use asyncmc_core::{
    CoreServer, Dependency, DependencyResolver, DescriptorStore, FnLoader, Module,
    ModuleDescriptor, RuntimeContext,
};
use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use semver::Version;
use std::sync::Arc;

// ============================================================================
// 测试辅助
// ============================================================================

/// 分层依赖图：每个模块依赖上一层中的最多 3 个模块
fn layered_store(size: usize, width: usize) -> DescriptorStore {
    let descriptors = (0..size).map(|i| {
        let layer = i / width;
        let mut descriptor = ModuleDescriptor::new(format!("module_{:04}", i), Version::new(1, 0, 0));
        if layer > 0 {
            let base = (layer - 1) * width;
            for offset in 0..3.min(width) {
                let dep = base + (i + offset) % width;
                descriptor = descriptor.depends_on(Dependency::new(format!("module_{:04}", dep)));
            }
        }
        descriptor
    });
    DescriptorStore::from_descriptors(descriptors).unwrap()
}

struct Idle;

#[async_trait]
impl Module for Idle {
    async fn start(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
        Ok(())
    }
}

// ============================================================================
// 解析基准测试
// ============================================================================

/// 不同规模依赖图的解析性能
fn resolve_size_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_size");

    for size in [10, 100, 500, 1000].iter() {
        let store = layered_store(*size, 10);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| DependencyResolver::resolve(black_box(store)).unwrap());
        });
    }

    group.finish();
}

/// 宽图与深图
fn resolve_shape_benchmark(c: &mut Criterion) {
    let wide = layered_store(500, 500);
    let deep = layered_store(500, 1);

    c.bench_function("resolve_wide_500", |b| {
        b.iter(|| DependencyResolver::resolve(black_box(&wide)).unwrap());
    });

    c.bench_function("resolve_deep_500", |b| {
        b.iter(|| DependencyResolver::resolve(black_box(&deep)).unwrap());
    });
}

/// 循环检测
fn cycle_detection_benchmark(c: &mut Criterion) {
    let mut descriptors: Vec<ModuleDescriptor> = (0..200)
        .map(|i| {
            ModuleDescriptor::new(format!("module_{:04}", i), Version::new(1, 0, 0))
                .depends_on(Dependency::new(format!("module_{:04}", (i + 1) % 200)))
        })
        .collect();
    descriptors.push(ModuleDescriptor::new("standalone", Version::new(1, 0, 0)));
    let store = DescriptorStore::from_descriptors(descriptors).unwrap();

    c.bench_function("resolve_cycle_200", |b| {
        b.iter(|| DependencyResolver::resolve(black_box(&store)).unwrap_err());
    });
}

// ============================================================================
// 完整流程基准测试
// ============================================================================

/// 构建、启动并关闭 100 个模块
fn boot_cycle_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("boot_shutdown_100", |b| {
        b.to_async(&rt).iter(|| async {
            let loader = Arc::new(FnLoader::new("idle", |_| Ok(Box::new(Idle) as Box<dyn Module>)));
            let mut builder = CoreServer::builder().loader(loader);
            for descriptor in layered_store(100, 10).iter() {
                builder = builder.descriptor((**descriptor).clone().with_loader("idle"));
            }

            let server = builder.build().await.unwrap();
            server.boot().await;
            server.shutdown().await
        });
    });
}

criterion_group!(
    resolve_benches,
    resolve_size_benchmark,
    resolve_shape_benchmark,
    cycle_detection_benchmark
);

criterion_group!(boot_benches, boot_cycle_benchmark);

criterion_main!(resolve_benches, boot_benches);
