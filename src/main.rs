//! AsyncMC Core 命令行入口
//!
//! # 命令概览
//!
//! - `start` - 发现模块并启动运行时，Ctrl+C 优雅关闭
//! - `plan` - 解析清单并打印启动阶段
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 启动运行时
//! asyncmc-core start
//!
//! # 使用自定义配置文件，严格模式启动
//! asyncmc-core -c server.yaml start --strict
//!
//! # 以 JSON 输出启动计划
//! asyncmc-core plan --json
//!
//! # 检查配置文件
//! asyncmc-core check-config -c server.yaml
//! ```
//!
//! 清单通过 `loader` 字段选择加载器。命令行内置 `heartbeat` 加载器，
//! 其他名称的加载器需要由嵌入核心的程序注入，找不到时对应模块以 `load_failed` 失败。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{debug, info, warn};

use asyncmc_core::{
    BootReport, CoreConfig, CoreServer, DependencyResolver, DescriptorStore, FnLoader, LogGuard,
    Logger, LoggerConfig, Module, ModuleDescriptor, RuntimeContext,
};

/// AsyncMC Core - 服务器核心
///
/// 模块发现、依赖解析与生命周期编排。
#[derive(Parser)]
#[command(name = "asyncmc-core")]
#[command(version, about = "AsyncMC 服务器核心", long_about = None)]
#[command(author = "AsyncMC Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 开发模式（默认 debug 日志）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 启动运行时
    ///
    /// 扫描清单目录、解析依赖并启动所有模块。按 Ctrl+C 优雅关闭。
    /// 未能完全启动时以非零状态退出。
    Start {
        /// 严格模式：出现故障的阶段之后不再启动
        #[arg(long)]
        strict: bool,

        /// 额外的清单目录
        #[arg(short, long)]
        modules: Vec<PathBuf>,
    },

    /// 打印启动计划
    Plan {
        /// 额外的清单目录
        #[arg(short, long)]
        modules: Vec<PathBuf>,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 验证配置文件
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 查看版本信息
    Version,
}

// ==================== 内置模块 ====================

/// 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// 周期性输出心跳日志的模块，用于验证清单与启动流程
struct Heartbeat {
    module_id: String,
}

#[async_trait]
impl Module for Heartbeat {
    async fn start(&mut self, ctx: &RuntimeContext) -> anyhow::Result<()> {
        let module_id = self.module_id.clone();
        ctx.scheduler().spawn_cancellable(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                debug!(module_id = %module_id, "心跳");
            }
        });
        Ok(())
    }

    async fn stop(&mut self, _ctx: &RuntimeContext) -> anyhow::Result<()> {
        debug!(module_id = %self.module_id, "心跳模块停止");
        Ok(())
    }
}

fn heartbeat_loader() -> FnLoader {
    FnLoader::new("heartbeat", |descriptor: &ModuleDescriptor| {
        Ok(Box::new(Heartbeat {
            module_id: descriptor.id.clone(),
        }) as Box<dyn Module>)
    })
}

// ==================== 命令 ====================

/// 初始化日志系统
fn init_logging(config: &CoreConfig, level: Option<&str>, dev_mode: bool) -> LogGuard {
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    if let Some(level) = level {
        logger_config.level = level.to_string();
    } else if dev_mode {
        logger_config.level = "debug".to_string();
    }
    Logger::try_init(logger_config)
}

/// 启动运行时
async fn run_start(config: CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("启动 AsyncMC 核心 v{}", asyncmc_core::VERSION);

    let server = CoreServer::builder()
        .config(config)
        .loader(Arc::new(heartbeat_loader()))
        .build()
        .await?;

    // Ctrl+C 在启动期间取消后续阶段，启动之后触发关闭
    let cancel = server.cancel_token();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let report = server.boot().await;
    print_report(&report);

    if !report.is_fully_started() {
        watcher.abort();
        warn!(state = %report.state, "运行时未能完全启动，开始关闭");
        let report = server.shutdown().await;
        print_report(&report);
        return Err(format!("运行时未能完全启动: {}", report.state).into());
    }

    println!();
    println!("运行时 {} 已启动，按 Ctrl+C 优雅关闭", server.runtime_id());
    println!();

    cancel.cancelled().await;

    info!("收到关闭信号，正在优雅关闭...");
    let report = server.shutdown().await;
    print_report(&report);
    info!("AsyncMC 核心已关闭");

    Ok(())
}

/// 打印启动计划
async fn print_plan(config: &CoreConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = DescriptorStore::new();
    store
        .scan(&config.modules.manifest_dirs, &config.modules.disabled)
        .await?;
    let plan = DependencyResolver::resolve(&store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!();
    println!("启动计划（{} 个模块，{} 个阶段）", plan.module_count(), plan.stage_count());
    println!("────────────────────────────────────────");
    for (index, stage) in plan.stages().iter().enumerate() {
        println!("  阶段 {}: {}", index, stage.join(", "));
    }
    println!("────────────────────────────────────────");
    Ok(())
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&CoreConfig::default());
        return Ok(());
    }

    match CoreConfig::from_file(path).await {
        Ok(config) => {
            println!("✅ 配置文件有效！");
            println!();
            print_config(&config);
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置文件无效 [{}]: {}", e.error_code(), e);
            Err(Box::new(e))
        }
    }
}

fn print_config(config: &CoreConfig) {
    let yes_no = |flag: bool| if flag { "是" } else { "否" };
    let boot = config.boot.to_boot_config();

    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [启动配置]");
    println!("    严格模式:       {}", yes_no(boot.strict));
    println!("    并发上限:       {}", boot.max_concurrency);
    println!("    启动时限:       {} ms", config.boot.start_timeout_ms);
    println!("    停止时限:       {} ms", config.boot.stop_timeout_ms);
    if !config.boot.module_timeouts.is_empty() {
        println!("    模块时限:       {:?}", config.boot.module_timeouts);
    }
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", yes_no(config.logging.file_output));
    println!("    JSON 格式:      {}", yes_no(config.logging.json_format));
    println!("    轮转策略:       {}", config.logging.rotation);
    println!();
    println!("  [模块配置]");
    println!("    清单目录:       {:?}", config.modules.manifest_dirs);
    println!("    禁用模块:       {:?}", config.modules.disabled);
    println!();
    println!("  [其他]");
    println!("    开发模式:       {}", yes_no(config.dev_mode));
    println!("────────────────────────────────────────");
}

fn print_report(report: &BootReport) {
    println!();
    println!("运行时状态: {}", report.state);
    println!("────────────────────────────────────────");
    for (id, module) in &report.modules {
        match module.condition {
            Some(ref condition) => println!("  {:<20} {:<10} {}", id, module.state.as_str(), condition),
            None => println!("  {:<20} {}", id, module.state),
        }
    }
    if let Some(ref root) = report.aborted_by {
        println!();
        println!("  中止原因: {}", root);
    }
    println!("────────────────────────────────────────");
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("AsyncMC Core - 服务器核心");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", asyncmc_core::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

/// 加载配置文件
async fn load_config(config_path: &Path, dev_mode: bool) -> Result<CoreConfig, Box<dyn std::error::Error>> {
    let mut config = if config_path.exists() {
        CoreConfig::from_file(config_path).await?
    } else {
        CoreConfig::default()
    };
    if dev_mode {
        config.dev_mode = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            print_version();
        }

        Some(Commands::CheckConfig { config }) => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
        }

        Some(Commands::Plan { modules, json }) => {
            let mut config = load_config(&cli.config, cli.dev).await?;
            config.modules.manifest_dirs.extend(modules);
            print_plan(&config, json).await?;
        }

        Some(Commands::Start { strict, modules }) => {
            let mut config = load_config(&cli.config, cli.dev).await?;
            config.boot.strict |= strict;
            config.modules.manifest_dirs.extend(modules);

            let _guard = init_logging(&config, cli.log_level.as_deref(), cli.dev);
            info!(config = %cli.config.display(), "配置已加载");
            run_start(config).await?;
        }

        None => {
            let config = load_config(&cli.config, cli.dev).await?;
            let _guard = init_logging(&config, cli.log_level.as_deref(), cli.dev);
            run_start(config).await?;
        }
    }

    Ok(())
}
