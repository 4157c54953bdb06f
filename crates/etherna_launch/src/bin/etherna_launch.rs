//! Etherna Launch CLI
//!
//! Usage:
//!   etherna_launch
//!   etherna_launch --https --disable elastic
//!   etherna_launch -c devenv.yaml --dry-run

use etherna_launch::{LaunchArgs, ProcessRunner, Session, SessionConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    // Load config
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading config file: {}", path);
            match SessionConfig::from_file(path) {
                Ok(config) => config,
                Err(e) => {
                    log::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => SessionConfig::default(),
    };
    if let Err(e) = args.apply(&mut config) {
        log::error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    // Validate only mode
    if args.validate {
        println!("Configuration is valid");
        println!("  Mode: {}", config.mode);
        println!("  Runtime: {}", config.runtime);
        println!("  Cache: {}", config.cache_dir.display());
        println!("  Bee workers: {}", config.bee_workers);
        return;
    }

    let shutdown_timeout = config.shutdown_timeout();
    let runner = Arc::new(ProcessRunner::new(shutdown_timeout));

    let session = match Session::new(config, runner, None) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to create session: {}", e);
            std::process::exit(1);
        }
    };

    // Dry run mode
    if args.dry_run {
        match session.plan() {
            Ok(plan) => {
                println!("{}", plan);
            }
            Err(e) => {
                log::error!("Failed to generate launch plan: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    // Ctrl+C, SIGTERM and SIGHUP all end the session
    {
        let shutdown_tx = shutdown_tx.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Received termination signal, initiating shutdown...");
            let _ = shutdown_tx.send(());
        }) {
            log::error!("Error setting signal handler: {}", e);
            std::process::exit(1);
        }
    }

    // Launch all services, stopping early on a signal
    let launch = session.launch();
    tokio::pin!(launch);
    let launched = tokio::select! {
        result = &mut launch => Some(result),
        _ = shutdown_rx.changed() => None,
    };

    match launched {
        Some(Ok(report)) => {
            println!("{}", report);
            // Wait for shutdown signal
            let _ = shutdown_rx.changed().await;
            session.shutdown().await;
        }
        Some(Err(e)) => {
            log::error!("Launch failed: {}", e);
            session.shutdown().await;
        }
        None => {
            session.shutdown().await;
            if let Ok(report) = launch.await {
                println!("{}", report);
            }
        }
    }

    session
        .wait_for_exit(shutdown_timeout + Duration::from_secs(1))
        .await;

    log::info!("Etherna launcher exiting");
}
