//! 启动编排集成测试
//!
//! 通过 CoreServer 测试完整的发现 -> 解析 -> 加载 -> 启动 -> 关闭流程

use asyncmc_core::context::event_bus::RUNTIME_STATE_CHANGED;
use asyncmc_core::{
    ConditionKind, CoreConfig, CoreError, CoreServer, Dependency, FnLoader, LifecycleState,
    Module, ModuleDescriptor, ModuleLoader, RuntimeContext, RuntimeState,
};
use async_trait::async_trait;
use semver::{Version, VersionReq};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// 测试辅助
// ============================================================================

type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Default)]
struct Script {
    fail_start: bool,
    panic_start: bool,
    fail_stop: bool,
    cancel_on_start: Option<CancellationToken>,
}

struct Scripted {
    id: String,
    script: Script,
    journal: Journal,
}

#[async_trait]
impl Module for Scripted {
    async fn start(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
        if self.script.panic_start {
            panic!("{} 启动时崩溃", self.id);
        }
        if self.script.fail_start {
            anyhow::bail!("{} 无法绑定端口", self.id);
        }
        if let Some(ref token) = self.script.cancel_on_start {
            token.cancel();
        }
        self.journal.lock().unwrap().push(format!("start:{}", self.id));
        Ok(())
    }

    async fn stop(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(format!("stop:{}", self.id));
        if self.script.fail_stop {
            anyhow::bail!("{} 无法释放资源", self.id);
        }
        Ok(())
    }
}

/// 一个加载器服务所有测试模块，按标识查找脚本
fn scripted_loader(scripts: HashMap<String, Script>, journal: Journal) -> Arc<dyn ModuleLoader> {
    Arc::new(FnLoader::new("scripted", move |descriptor| {
        Ok(Box::new(Scripted {
            id: descriptor.id.clone(),
            script: scripts.get(&descriptor.id).cloned().unwrap_or_default(),
            journal: Arc::clone(&journal),
        }) as Box<dyn Module>)
    }))
}

fn module(id: &str, deps: &[&str]) -> ModuleDescriptor {
    deps.iter().fold(
        ModuleDescriptor::new(id, Version::new(1, 0, 0)),
        |descriptor, dep| descriptor.depends_on(Dependency::new(*dep)),
    )
}

async fn server_with(
    config: CoreConfig,
    modules: Vec<ModuleDescriptor>,
    scripts: Vec<(&str, Script)>,
) -> (CoreServer, Journal) {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let scripts = scripts
        .into_iter()
        .map(|(id, script)| (id.to_string(), script))
        .collect();
    let loader = scripted_loader(scripts, Arc::clone(&journal));

    let builder = modules
        .into_iter()
        .fold(CoreServer::builder().config(config), |builder, descriptor| {
            builder.module(descriptor, Arc::clone(&loader))
        });
    (builder.build().await.unwrap(), journal)
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

// ============================================================================
// 启动
// ============================================================================

/// 测试依赖顺序启动与逆序关闭
#[tokio::test]
async fn test_boot_follows_dependency_order() {
    let (server, journal) = server_with(
        CoreConfig::default(),
        vec![
            module("net", &[]),
            module("auth", &["net"]),
            module("api", &["auth", "net"]),
        ],
        vec![],
    )
    .await;

    assert_eq!(
        server.plan().stages(),
        &[
            vec!["net".to_string()],
            vec!["auth".to_string()],
            vec!["api".to_string()]
        ]
    );

    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::FullyStarted);
    assert_eq!(report.modules_in(LifecycleState::Started), vec!["api", "auth", "net"]);
    assert_eq!(report.modules["api"].stage, 2);

    let report = server.shutdown().await;
    assert_eq!(report.state, RuntimeState::Stopped);
    assert_eq!(
        entries(&journal),
        vec!["start:net", "start:auth", "start:api", "stop:api", "stop:auth", "stop:net"]
    );
}

/// 测试部分失败隔离：A 失败，B 依赖 A 而失败，C 正常启动
#[tokio::test]
async fn test_partial_failure_isolation() {
    let (server, journal) = server_with(
        CoreConfig::default(),
        vec![module("a", &[]), module("b", &["a"]), module("c", &[])],
        vec![(
            "a",
            Script {
                fail_start: true,
                ..Script::default()
            },
        )],
    )
    .await;

    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::Degraded);
    assert_eq!(report.state_of("a"), Some(LifecycleState::Failed));
    assert_eq!(report.state_of("b"), Some(LifecycleState::Failed));
    assert_eq!(report.state_of("c"), Some(LifecycleState::Started));

    let a = report.condition_of("a").unwrap();
    assert_eq!(a.kind, ConditionKind::StartFailed);
    assert!(a.reason.contains("无法绑定端口"));

    let b = report.condition_of("b").unwrap();
    assert_eq!(b.kind, ConditionKind::DependencyFailed);
    assert_eq!(b.root().module, "a");

    // b 的启动逻辑从未执行
    assert_eq!(entries(&journal), vec!["start:c"]);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"dependency_failed\""));
    assert!(json.contains("\"degraded\""));
}

/// 测试失败沿依赖链传递，因果链指向根因
#[tokio::test]
async fn test_failure_chain_reaches_root() {
    let (server, _) = server_with(
        CoreConfig::default(),
        vec![
            module("net", &[]),
            module("auth", &["net"]),
            module("api", &["auth"]),
        ],
        vec![(
            "net",
            Script {
                panic_start: true,
                ..Script::default()
            },
        )],
    )
    .await;

    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::Failed);

    let api = report.condition_of("api").unwrap();
    assert_eq!(api.depth(), 3);
    assert_eq!(api.caused_by.as_ref().unwrap().module, "auth");
    assert_eq!(api.root().kind, ConditionKind::StartFailed);
    assert!(api.root().reason.contains("net 启动时崩溃"));
}

/// 测试可选依赖失败不阻塞依赖方
#[tokio::test]
async fn test_failed_optional_dependency_does_not_block() {
    let metrics = ModuleDescriptor::new("metrics", Version::new(1, 0, 0));
    let api = ModuleDescriptor::new("api", Version::new(1, 0, 0))
        .depends_on(Dependency::new("metrics").optional());
    let (server, journal) = server_with(
        CoreConfig::default(),
        vec![metrics, api],
        vec![(
            "metrics",
            Script {
                fail_start: true,
                ..Script::default()
            },
        )],
    )
    .await;

    assert_eq!(server.plan().stage_of("api"), Some(1));

    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::Degraded);
    assert_eq!(report.state_of("api"), Some(LifecycleState::Started));
    assert_eq!(entries(&journal), vec!["start:api"]);
}

/// 测试缺失的加载器只影响对应模块
#[tokio::test]
async fn test_missing_loader_is_load_failed() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let server = CoreServer::builder()
        .module(
            module("net", &[]),
            scripted_loader(HashMap::new(), Arc::clone(&journal)),
        )
        .descriptor(module("world", &["net"]).with_loader("anvil"))
        .descriptor(module("chat", &[]).with_loader("anvil"))
        .build()
        .await
        .unwrap();

    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::Degraded);
    assert_eq!(report.state_of("net"), Some(LifecycleState::Started));

    let world = report.condition_of("world").unwrap();
    assert_eq!(world.kind, ConditionKind::LoadFailed);
    assert!(world.reason.contains("anvil"));
    assert_eq!(report.state_of("chat"), Some(LifecycleState::Failed));
}

/// 测试重复启动与重复关闭是幂等的
#[tokio::test]
async fn test_boot_and_shutdown_are_idempotent() {
    let (server, journal) = server_with(
        CoreConfig::default(),
        vec![module("net", &[]), module("auth", &["net"])],
        vec![],
    )
    .await;

    let first = server.boot().await;
    let second = server.boot().await;
    assert_eq!(first, second);
    assert_eq!(entries(&journal).len(), 2);

    let first = server.shutdown().await;
    let second = server.shutdown().await;
    assert_eq!(first, second);
    assert_eq!(entries(&journal).len(), 4);

    // 关闭之后不能再次启动
    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::Stopped);
    assert_eq!(entries(&journal).len(), 4);
}

/// 测试停止失败不影响其他模块的停止
#[tokio::test]
async fn test_total_shutdown_despite_stop_failure() {
    let (server, journal) = server_with(
        CoreConfig::default(),
        vec![module("a", &[]), module("b", &["a"])],
        vec![(
            "b",
            Script {
                fail_stop: true,
                ..Script::default()
            },
        )],
    )
    .await;

    server.boot().await;
    let report = server.shutdown().await;

    assert_eq!(report.state, RuntimeState::Stopped);
    assert_eq!(report.state_of("a"), Some(LifecycleState::Stopped));
    assert_eq!(report.state_of("b"), Some(LifecycleState::Failed));
    assert_eq!(
        report.condition_of("b").map(|c| c.kind),
        Some(ConditionKind::StopFailed)
    );
    assert_eq!(
        entries(&journal),
        vec!["start:a", "start:b", "stop:b", "stop:a"]
    );
}

/// 测试严格模式中止后续阶段
#[tokio::test]
async fn test_strict_mode_leaves_later_stages_loaded() {
    let (server, journal) = server_with(
        CoreConfig::builder().strict().build(),
        vec![
            module("net", &[]),
            module("store", &[]),
            module("api", &["store"]),
        ],
        vec![(
            "net",
            Script {
                fail_start: true,
                ..Script::default()
            },
        )],
    )
    .await;

    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::Failed);
    assert_eq!(report.state_of("api"), Some(LifecycleState::Loaded));
    assert_eq!(report.aborted_by.as_ref().map(|c| c.module.as_str()), Some("net"));

    // 只有已启动的模块需要停止
    let report = server.shutdown().await;
    assert_eq!(report.state_of("store"), Some(LifecycleState::Stopped));
    assert_eq!(report.state_of("api"), Some(LifecycleState::Loaded));
    assert_eq!(entries(&journal), vec!["start:store", "stop:store"]);
}

/// 测试启动过程中取消：当前阶段完成，后续阶段不再启动
#[tokio::test]
async fn test_cancel_during_boot() {
    let cancel = CancellationToken::new();
    let (server, journal) = server_with(
        CoreConfig::default(),
        vec![module("net", &[]), module("auth", &["net"])],
        vec![(
            "net",
            Script {
                cancel_on_start: Some(cancel.clone()),
                ..Script::default()
            },
        )],
    )
    .await;

    let report = server.boot_with(cancel).await;
    assert_eq!(report.state, RuntimeState::Cancelled);
    assert_eq!(report.state_of("net"), Some(LifecycleState::Started));
    assert_eq!(report.state_of("auth"), Some(LifecycleState::Loaded));
    assert_eq!(entries(&journal), vec!["start:net"]);

    let report = server.shutdown().await;
    assert_eq!(report.state_of("net"), Some(LifecycleState::Stopped));
}

// ============================================================================
// 发现与查询
// ============================================================================

/// 测试解析错误在构建时返回
#[tokio::test]
async fn test_resolution_errors_surface_from_build() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let loader = scripted_loader(HashMap::new(), journal);

    let err = CoreServer::builder()
        .module(module("a", &["b"]), Arc::clone(&loader))
        .module(module("b", &["a"]), Arc::clone(&loader))
        .build()
        .await
        .unwrap_err();
    match err {
        CoreError::CyclicDependency { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
        other => panic!("意外的错误: {}", other),
    }

    let err = CoreServer::builder()
        .module(module("api", &["auth"]), Arc::clone(&loader))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::MissingDependency { .. }));

    let err = CoreServer::builder()
        .module(module("net", &[]), Arc::clone(&loader))
        .module(
            module("auth", &[]).depends_on(
                Dependency::new("net").with_version(VersionReq::parse(">=2.0").unwrap()),
            ),
            Arc::clone(&loader),
        )
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::VersionMismatch { .. }));

    let err = CoreServer::builder()
        .module(module("net", &[]), Arc::clone(&loader))
        .module(module("net", &[]), Arc::clone(&loader))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateModule(_)));
}

/// 测试同名的不同加载器被拒绝
#[tokio::test]
async fn test_conflicting_loaders_rejected() {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let err = CoreServer::builder()
        .module(
            module("a", &[]),
            scripted_loader(HashMap::new(), Arc::clone(&journal)),
        )
        .module(
            module("b", &[]),
            scripted_loader(HashMap::new(), Arc::clone(&journal)),
        )
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateLoader(ref name) if name == "scripted"));
}

/// 测试按能力查找已启动模块
#[tokio::test]
async fn test_find_modules_by_capability() {
    let (server, _) = server_with(
        CoreConfig::default(),
        vec![
            module("net", &[]).provides("transport"),
            module("quic", &[]).provides("transport"),
            module("auth", &["net"]).provides("login"),
        ],
        vec![(
            "quic",
            Script {
                fail_start: true,
                ..Script::default()
            },
        )],
    )
    .await;

    assert!(server.find_modules("transport").await.is_empty());

    server.boot().await;
    assert_eq!(server.find_modules("transport").await, vec!["net"]);
    assert_eq!(server.find_modules("login").await, vec!["auth"]);
    assert!(server.find_modules("storage").await.is_empty());

    server.shutdown().await;
    assert!(server.find_modules("transport").await.is_empty());
}

/// 测试禁用列表同样作用于以编程方式注册的模块
#[tokio::test]
async fn test_disabled_builder_modules_are_skipped() {
    let config = CoreConfig::builder().disable("metrics").build();
    let (server, journal) = server_with(
        config,
        vec![module("net", &[]), module("metrics", &[]), module("chat", &["net"])],
        vec![],
    )
    .await;

    assert_eq!(server.descriptors().ids(), vec!["chat", "net"]);
    let report = server.boot().await;
    assert_eq!(report.state, RuntimeState::FullyStarted);
    assert!(report.state_of("metrics").is_none());
    assert!(!entries(&journal).contains(&"start:metrics".to_string()));
}

/// 测试生命周期事件发布到运行时上下文
#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let (server, _) = server_with(CoreConfig::default(), vec![module("net", &[])], vec![]).await;
    let (_, mut module_events) = server
        .context()
        .events()
        .subscribe_channel("test", "module.*")
        .await;
    let (_, mut runtime_events) = server
        .context()
        .events()
        .subscribe_channel("test", RUNTIME_STATE_CHANGED)
        .await;

    server.boot().await;
    server.shutdown().await;
    server.context().events().flush().await;

    let mut topics = Vec::new();
    while let Ok(event) = module_events.try_recv() {
        assert_eq!(event.source, "core");
        topics.push(event.topic);
    }
    assert_eq!(
        topics,
        vec![
            "module.loaded",
            "module.starting",
            "module.started",
            "module.stopping",
            "module.stopped"
        ]
    );

    let mut transitions = Vec::new();
    while let Ok(event) = runtime_events.try_recv() {
        assert_eq!(event.data["runtime_id"], server.runtime_id());
        transitions.push(event.data["to"].as_str().unwrap_or_default().to_string());
    }
    assert_eq!(transitions, vec!["fully_started", "stopped"]);
}
