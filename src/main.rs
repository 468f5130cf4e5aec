// src/main.rs

//! The main entry point for the feedgate adaptor framework.
//!
//! Usage: `feedgate [--config <path>] [-D<key>=<value> ...] <adaptor-command>
//! [adaptor-args...]`. The positional argument names the external program
//! implementing the lister/retriever/authorizer roles over the command
//! stream protocol.

use feedgate::config::Config;
use feedgate::core::command_adaptor::CommandAdaptor;
use feedgate::core::transform::TransformRegistry;
use feedgate::server;
use feedgate::server::logbuffer::{LogBuffer, LogBufferLayer};
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() {
    std::process::exit(run_app().await);
}

async fn run_app() -> i32 {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version") {
        println!("feedgate version {VERSION}");
        return 0;
    }

    // Split flags from the adaptor invocation.
    let mut config_path: Option<String> = None;
    let mut overrides: Vec<(String, String)> = Vec::new();
    let mut adaptor_invocation: Vec<String> = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            match iter.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("--config flag requires a value");
                    return 2;
                }
            }
        } else if let Some(pair) = arg.strip_prefix("-D") {
            match pair.split_once('=') {
                Some((k, v)) => overrides.push((k.to_string(), v.to_string())),
                None => {
                    eprintln!("-D flags take the form -Dkey=value, got '-D{pair}'");
                    return 2;
                }
            }
        } else {
            // First positional argument starts the adaptor invocation.
            adaptor_invocation.push(arg);
            adaptor_invocation.extend(iter.by_ref());
        }
    }

    if adaptor_invocation.is_empty() {
        eprintln!("Usage: feedgate [--config <path>] [-Dkey=value ...] <adaptor-command> [args...]");
        return 2;
    }

    // -Dadaptor.configfile is an alternate spelling of --config.
    if config_path.is_none() {
        config_path = overrides
            .iter()
            .find(|(k, _)| k == "adaptor.configfile")
            .map(|(_, v)| v.clone());
    }

    // Assemble the configuration: declared keys, then file, then -D
    // overrides (highest precedence).
    let config = Config::with_default_keys();
    if let Some(path) = &config_path {
        if let Err(e) = config.load(path) {
            eprintln!("Failed to load configuration from \"{path}\": {e}");
            return 2;
        }
    }
    for (key, value) in &overrides {
        config.set_value(key, value);
    }

    // An optional properties file is mirrored into the process environment
    // (not into Config) before anything validates.
    match config.get_value("adaptor.env.file") {
        Ok(path) if !path.trim().is_empty() => {
            if let Err(e) = load_env_file(&path) {
                eprintln!("Failed to load adaptor.env.file '{path}': {e}");
                return 2;
            }
        }
        _ => {}
    }

    // Setup logging with reloading capabilities, mirrored into the
    // dashboard's log buffer.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    let log_buffer = Arc::new(LogBuffer::default());
    tracing_subscriber::registry()
        .with(filter)
        .with(LogBufferLayer {
            buffer: log_buffer.clone(),
        })
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();
    let reload_handle = Arc::new(reload_handle);

    let (program, extra_args) = adaptor_invocation.split_first().expect("checked non-empty");
    let adaptor = Arc::new(CommandAdaptor::new(program, extra_args.to_vec()));
    let transforms = TransformRegistry::new();

    let code = server::run_daemon(
        Arc::new(config),
        adaptor,
        &transforms,
        reload_handle,
        log_buffer,
    )
    .await;
    if code != 0 {
        error!("Exiting with code {code}.");
    }
    code
}

fn load_env_file(path: &str) -> Result<(), feedgate::core::FeedgateError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| feedgate::core::FeedgateError::InvalidConfiguration(e.to_string()))?;
    for (key, value) in feedgate::config::properties::parse(&contents)? {
        // SAFETY: called before any thread is spawned beyond the runtime's
        // own, matching the documented requirement of set_var.
        unsafe {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}
