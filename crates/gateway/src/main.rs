use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wv_domain::config::{Config, ConfigSeverity};

use wv_gateway::{api, bootstrap};

#[derive(Parser)]
#[command(name = "weaver", about = "Weaver agent orchestration server", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "weaver.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Bind host override.
        #[arg(long)]
        host: Option<String>,
        /// Bind port override.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the configuration and print the effective values.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Check => check(config),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("WEAVER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("WEAVER_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Ok(Config::load(&raw)?)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults + env");
        let mut config = Config::default();
        config.apply_env();
        Ok(config)
    }
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let state = bootstrap::build_app_state(Arc::new(config), Vec::new())?;
    let router = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(addr = %bind, "weaver listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn check(config: Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    println!(
        "{} error(s), {} warning(s)",
        errors,
        issues.len() - errors
    );
    println!(
        "effective config:\n{}",
        toml::to_string_pretty(&config).unwrap_or_default()
    );
    if errors > 0 {
        anyhow::bail!("configuration invalid");
    }
    Ok(())
}
