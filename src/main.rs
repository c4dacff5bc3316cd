//! Entry point for the shieldrt node process.
//!
//! Loads configuration, builds and starts a `Coordinator`, and blocks
//! until a shutdown signal arrives. Configuration/startup failures exit
//! with code 1 (SPEC_FULL.md §6); everything else runs until interrupted.
//!
//! The tokio runtime is built by hand rather than via `#[tokio::main]` so
//! that `actor_system.worker_threads` actually governs the thread pool
//! size, per `execution::parallel::ParallelExecutor::new`.

use std::path::PathBuf;

use shieldrt::config::Config;
use shieldrt::Coordinator;
use tracing::{error, info};

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("shieldrt.toml"));

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.actor_system.worker_threads)
        .thread_name("shieldrt-worker")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(run(config));
}

async fn run(config: Config) {
    info!("starting node '{}'", config.actor_system.resolve_node_id());

    let coordinator = match Coordinator::initialize(config, Some(status_logger()), true).await {
        Ok(c) => c,
        Err(e) => {
            error!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    coordinator.start();
    info!("node is running, press ctrl-c to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutdown requested");
    coordinator.stop().await;
    info!("shutdown complete");
}

fn load_config(path: &PathBuf) -> shieldrt::Result<Config> {
    if path.exists() {
        Config::from_file(path)
    } else {
        info!(
            "no config file at {} — using defaults with local discovery",
            path.display()
        );
        let toml = "[discovery]\ntype = \"local\"\n\n[actor_system]\n\n[lua_vm_pool]\n";
        Config::from_toml_str(toml)
    }
}

fn status_logger() -> std::sync::Arc<dyn Fn(String, bool) + Send + Sync> {
    std::sync::Arc::new(|message: String, is_error: bool| {
        if is_error {
            error!("{message}");
        } else {
            info!("{message}");
        }
    })
}

fn print_banner() {
    println!();
    println!("╭─────────────────────────────────────────────────────────╮");
    println!("│              shieldrt — actor runtime node               │");
    println!("╰─────────────────────────────────────────────────────────╯");
    println!();
}
