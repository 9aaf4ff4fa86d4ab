mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webloom_browser::WebDriverProvider;
use webloom_core::config::{self, AppConfig};
use webloom_core::event::EventBus;
use webloom_core::traits::CookieStore;
use webloom_core::types::RunEvent;
use webloom_engine::graph::{ActionPlan, Node, NodeKind};
use webloom_engine::{ExecutionEngine, Graph, SessionPool, TaskScheduler};
use webloom_gateway::GatewayServer;
use webloom_store::SqliteStore;

#[derive(Parser)]
#[command(name = "webloom", version, about = "Browser automation workflow orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "webloom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket/HTTP gateway and the task scheduler (default)
    Serve,
    /// Execute a workflow file once and print its progress
    Run {
        /// Workflow JSON ({nodes, connections})
        file: PathBuf,
        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },
    /// Print the execution order of a workflow file
    Plan {
        /// Workflow JSON ({nodes, connections})
        file: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Run system health checks
    Doctor,
    /// Manage stored browser cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// List domains with stored cookies
    List,
    /// Delete the cookies stored for a domain
    Delete {
        /// Domain or URL; reduced to its primary domain
        domain: String,
    },
    /// Remove cookie sets not updated recently
    Cleanup {
        /// Age threshold in days
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("webloom=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "webloom", &mut std::io::stdout());
        return Ok(());
    }

    // Plan needs no config or storage
    if let Some(Commands::Plan { file }) = &cli.command {
        return print_plan(file);
    }

    let mut config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Doctor) => {
            println!("webloom doctor");
            println!("==============");
            doctor::run_doctor(&config).await;
        }
        Some(Commands::Cookies { action }) => {
            let store = open_store(&config)?;
            handle_cookies(store.as_ref(), action).await?;
        }
        Some(Commands::Run { file, headed }) => {
            if headed {
                config.browser.headless = false;
            }
            run_file(&config, &file).await?;
        }
        Some(Commands::Serve) | None => serve(config).await?,
        Some(Commands::Plan { .. }) => unreachable!("handled before config load"),
        Some(Commands::Completions { .. }) => unreachable!("handled before config load"),
    }

    Ok(())
}

/// `webloom.toml` (or `--config`), then `~/.webloom/config.toml`, then defaults.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = config::dirs_home().map(|h| h.join(".webloom").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home)?);
        }
    }
    info!("No config file found; using defaults");
    Ok(AppConfig::default())
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("creating workspace {}", workspace.display()))?;
    Ok(Arc::new(SqliteStore::open(&config.database_path())?))
}

fn session_pool(config: &AppConfig, cookies: Arc<dyn CookieStore>) -> anyhow::Result<SessionPool> {
    let provider = WebDriverProvider::new(config.browser.clone())?.with_cookie_store(cookies);
    Ok(SessionPool::new(Arc::new(provider), config.engine.max_sessions))
}

fn read_graph(file: &Path) -> anyhow::Result<Graph> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
    Ok(Graph::from_value(value)?)
}

fn describe(node: &Node) -> String {
    match &node.kind {
        NodeKind::Start => match node.start_url() {
            Some(url) => format!("open {}", url),
            None => "start (no url)".to_string(),
        },
        NodeKind::Action => match node.action_spec().map(|spec| spec.plan()) {
            Some(ActionPlan::Click { selector }) => format!("click {}", selector),
            Some(ActionPlan::Input { selector, value }) => format!("fill {} = {:?}", selector, value),
            Some(ActionPlan::Extract { selector }) => format!("extract {}", selector),
            Some(ActionPlan::Incomplete(field)) => format!("skipped (missing {})", field),
            Some(ActionPlan::Unsupported(op)) => format!("unsupported operation '{}'", op),
            None => "action".to_string(),
        },
        NodeKind::Unknown(kind) => format!("ignored ({})", kind),
    }
}

fn print_plan(file: &Path) -> anyhow::Result<()> {
    let graph = read_graph(file)?;
    let order = webloom_engine::plan(&graph)?;
    println!("{} nodes, {} connections", graph.nodes.len(), graph.edges.len());
    for (i, node) in order.nodes().iter().enumerate() {
        println!("  {:>3}. {:<20} {}", i + 1, node.id, describe(node));
    }
    Ok(())
}

async fn run_file(config: &AppConfig, file: &Path) -> anyhow::Result<()> {
    let graph = read_graph(file)?;
    let order = webloom_engine::plan(&graph)?;

    let store = open_store(config)?;
    let pool = Arc::new(session_pool(config, store)?);
    let bus = Arc::new(EventBus::new(config.engine.event_buffer));
    let mut events = bus.subscribe();
    let engine = ExecutionEngine::new(pool, bus.clone(), config.engine.unsupported_operations);

    let (execution_id, handle) = engine.spawn(order);
    println!("Run {} started", execution_id);

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                RunEvent::RunStarted { node_count, .. } => {
                    println!("  session acquired, {} nodes", node_count)
                }
                RunEvent::NodeUpdate {
                    node_id,
                    state,
                    error,
                    ..
                } => match error {
                    Some(e) => println!("  [{}] {}: {}", state, node_id, e),
                    None => println!("  [{}] {}", state, node_id),
                },
                RunEvent::Warning {
                    node_id, message, ..
                } => println!(
                    "  [warn] {}{}",
                    node_id.as_deref().map(|n| format!("{}: ", n)).unwrap_or_default(),
                    message
                ),
                RunEvent::RunCompleted { .. } => break,
            }
        }
    });

    let shutdown = engine.clone();
    let id = execution_id.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.cancel(&id);
    });

    let outcome = handle.await.context("run task failed")?;
    let _ = printer.await;

    for (node_id, text) in &outcome.extracted {
        println!("  {} => {}", node_id, text);
    }
    println!(
        "Run {} {} in {} ms",
        outcome.execution_id, outcome.status, outcome.elapsed_ms
    );
    match outcome.error {
        Some(error) if !outcome.succeeded() => anyhow::bail!(error),
        _ => Ok(()),
    }
}

async fn handle_cookies(store: &SqliteStore, action: CookieAction) -> anyhow::Result<()> {
    match action {
        CookieAction::List => {
            let domains = store.list_domains().await?;
            if domains.is_empty() {
                println!("No stored cookies.");
            }
            for d in domains {
                println!(
                    "  {:<32} {:>4} cookies  {}",
                    d.domain,
                    d.cookie_count,
                    d.last_updated.format("%Y-%m-%d %H:%M")
                );
            }
        }
        CookieAction::Delete { domain } => {
            if store.delete_cookies(&domain).await? {
                println!("Deleted cookies for {}", domain);
            } else {
                println!("No cookies stored for {}", domain);
            }
        }
        CookieAction::Cleanup { days } => {
            let removed = store.cleanup_older_than(days).await?;
            println!("Removed {} cookie sets older than {} days", removed, days);
        }
    }
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let pool = Arc::new(session_pool(&config, store.clone())?);
    let event_bus = Arc::new(EventBus::new(config.engine.event_buffer));
    let engine = ExecutionEngine::new(
        pool,
        event_bus.clone(),
        config.engine.unsupported_operations,
    );
    let scheduler = Arc::new(TaskScheduler::new(
        store.clone(),
        store.clone(),
        engine.clone(),
        Duration::from_secs(config.scheduler.refresh_secs.max(1)),
    ));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
        cancel_clone.cancel();
    });

    if config.scheduler.enabled {
        tokio::spawn(scheduler.clone().run(cancel.clone()));
    } else {
        info!("Task scheduler disabled");
    }

    info!(
        webdriver = %config.browser.webdriver_url,
        max_sessions = config.engine.max_sessions,
        "Starting webloom gateway"
    );
    let server = GatewayServer::new(
        config.gateway.clone(),
        engine.clone(),
        event_bus,
        store.clone(),
        store,
        scheduler,
    );
    server.run(cancel).await?;

    let cancelled = engine.runs().cancel_all();
    if cancelled > 0 {
        warn!(cancelled, "Cancelled in-flight runs on shutdown");
    }
    Ok(())
}
