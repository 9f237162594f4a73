//! Quarry API server binary.
//!
//! Usage:
//!   quarry-api --config quarry.toml
//!   quarry-api --port 8080
//!   quarry-api --port 8080 --bind 0.0.0.0
//!
//! # Environment Variables
//!
//! - `GOOGLE_CLOUD_PROJECT` - Cloud project (required)
//! - `GOOGLE_CLOUD_LOCATION` - Cloud region (required)
//! - `CODE_INTERPRETER_EXTENSION_NAME` - Code-execution extension for analysis (required)
//! - `QUARRY_BIND_ADDR` - Server bind address (default: 127.0.0.1)
//! - `QUARRY_CORS_ORIGINS` - CORS allowed origins (comma-separated)
//! - `GOOGLE_API_KEY` / `GOOGLE_CLOUD_ACCESS_TOKEN` / `OPENAI_API_KEY` - Model credentials
//!
//! A `.env` file in the working directory is loaded first.

use anyhow::Context;
use quarry_api::{AppState, serve};
use quarry_coordinator::{CoordinatorConfig, EnvSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_help() {
    println!("Quarry API Server");
    println!();
    println!("Usage: quarry-api [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -p, --port <PORT>        Port to listen on (default: 8080)");
    println!("  -b, --bind <ADDR>        Bind address (default: 127.0.0.1, env: QUARRY_BIND_ADDR)");
    println!("  -c, --config <FILE>      Path to config.toml file");
    println!("  -h, --help               Show this help message");
    println!();
    println!("Required environment variables:");
    println!("  GOOGLE_CLOUD_PROJECT");
    println!("  GOOGLE_CLOUD_LOCATION");
    println!("  CODE_INTERPRETER_EXTENSION_NAME");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quarry_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut port: u16 = 8080;
    let mut config_path: Option<String> = None;
    let mut bind_addr: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1]
                        .parse()
                        .with_context(|| format!("Invalid port number '{}'", args[i + 1]))?;
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    bind_addr = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                tracing::warn!(argument = %other, "Ignoring unknown argument");
            }
        }
        i += 1;
    }

    let env = EnvSettings::from_env()?;
    tracing::info!(
        project = %env.project,
        location = %env.location,
        code_interpreter = %env.code_interpreter_extension,
        "Environment loaded"
    );

    let host = bind_addr
        .or_else(|| std::env::var("QUARRY_BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    if host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0. This exposes the API to all network interfaces; \
             put it behind an authenticating proxy."
        );
    }

    let cors_origins: Option<Vec<String>> = std::env::var("QUARRY_CORS_ORIGINS")
        .ok()
        .map(|s| s.split(',').map(|o| o.trim().to_string()).collect());

    let config = if let Some(path) = config_path {
        tracing::info!(path = %path, "Loading configuration");
        CoordinatorConfig::from_file(&path)?
    } else {
        tracing::info!("Using default configuration");
        CoordinatorConfig::default()
    };

    let state = AppState::from_config(&config, &env)?;

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    serve(Arc::new(state), addr, cors_origins).await?;

    Ok(())
}
