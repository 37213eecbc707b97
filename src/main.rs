//! stream-notifier binary entrypoint.
//! Loads the config, then either runs every source loop until Ctrl-C/SIGTERM
//! or sends a single test push (`--push-test`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stream_notifier::config::{load_config, resolve_path, ENV_CONFIG_PATH};
use stream_notifier::notify::NotifierMux;
use stream_notifier::scheduler::{Scheduler, SchedulerCfg, DEFAULT_SHUTDOWN_GRACE};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "stream-notifier", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON). Defaults to `config.yml`.
    #[arg(short, long, value_name = "CONFIG_PATH", env = ENV_CONFIG_PATH)]
    path: Option<PathBuf>,

    /// Directory holding the per-source cache files.
    #[arg(short, long, value_name = "CACHE_DIR", default_value = "cache")]
    cache_dir: PathBuf,

    /// Test mode: evaluate and report, but never push to platforms.
    #[arg(short, long)]
    test: bool,

    /// Send CONTENT to DESTINATION once and exit.
    #[arg(long, num_args = 2, value_names = ["DESTINATION", "CONTENT"])]
    push_test: Option<Vec<String>>,

    /// Keep caches in memory only.
    #[arg(long)]
    no_cache: bool,
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn push_test(mux: &NotifierMux, destination: &str, content: &str) -> Result<()> {
    mux.send_one(destination, content)
        .await
        .with_context(|| format!("push test to {destination}"))?;
    tracing::info!(destination, "push test sent");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let path = resolve_path(cli.path);
    let cfg = load_config(&path)?;
    tracing::info!(path = %path.display(), sources = cfg.sources.len(), "config loaded");

    if let Some(args) = cli.push_test.as_deref() {
        let [destination, content] = args else {
            anyhow::bail!("--push-test takes DESTINATION and CONTENT");
        };
        let mux = NotifierMux::from_config(&cfg.push_methods, cli.test);
        let res = push_test(&mux, destination, content).await;
        mux.close().await;
        return res;
    }

    let opts = SchedulerCfg {
        cache_dir: cli.cache_dir,
        use_cache: !cli.no_cache,
        test_mode: cli.test,
        grace: DEFAULT_SHUTDOWN_GRACE,
    };
    let scheduler = Scheduler::from_config(&cfg, &opts)?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        let _ = tx.send(true);
    });

    scheduler.run(rx).await;
    Ok(())
}
