//! ticketing-bridge daemon entry point
//!
//! Reads one JSON request per line from stdin (`{"id": .., "op": .., "args": {..}}`)
//! and writes one JSON envelope per line to stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ticketing_bridge::auth::{TokenPrewarmer, TokenStore};
use ticketing_bridge::cache::UserCache;
use ticketing_bridge::client::{RequestExecutor, TicketingClient};
use ticketing_bridge::clock::{Clock, SystemClock};
use ticketing_bridge::config::Config;
use ticketing_bridge::service::{BridgeService, Envelope, Request};
use ticketing_bridge::transport::{ReqwestTransport, Transport};
use ticketing_bridge::BridgeError;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: ticketing-bridge <config.yaml>");
    eprintln!();
    eprintln!("ticketing-bridge - Relay between a chatbot and a ticketing REST API");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!();
    eprintln!("Requests are read from stdin, one JSON object per line:");
    eprintln!("  {{\"id\": 1, \"op\": \"get_tickets\", \"args\": {{\"page\": 1}}}}");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  ticketing-bridge /etc/ticketing-bridge/config.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging; stdout carries responses
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("ticketing-bridge starting");
    info!("Loaded configuration from {:?}", config_path);
    info!("Remote API: {}", config.remote.base_url);

    if !config.remote.credentials.password.is_empty() {
        warn!("The logon endpoint receives the password as a URL query parameter; use HTTPS or a trusted network");
    }

    // Wire up components
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.remote.timeout)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let tokens = Arc::new(TokenStore::new(
        transport.clone(),
        clock.clone(),
        config.remote.base_url.clone(),
        config.remote.credentials.clone(),
        config.token.expiry_buffer,
    ));
    let users = Arc::new(UserCache::new(clock, &config.cache));
    let executor = RequestExecutor::new(
        transport,
        tokens.clone(),
        config.remote.base_url.clone(),
        config.retry.clone(),
        config.retry_mutations,
    );
    let client = Arc::new(TicketingClient::new(executor, tokens.clone(), users));
    let prewarmer = TokenPrewarmer::new(tokens, config.prewarming.schedule.clone());
    let service = Arc::new(BridgeService::new(client, prewarmer.clone()));

    if config.prewarming.enabled {
        if !prewarmer.start().await {
            // Requests still authenticate on demand
            warn!("Token pre-warming could not start; continuing without it");
        }
    } else {
        info!("Token pre-warming disabled");
    }

    // Set up signal handling for graceful shutdown
    let shutdown = Arc::new(Notify::new());
    let s = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        s.notify_one();
    })?;

    // Responses are funneled through one writer so lines never interleave
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_line(&mut stdout, &line).await {
                error!("Failed to write response: {}", e);
                break;
            }
        }
    });

    info!("Ready for requests on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.notified() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                error!("Failed to read request: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let service = service.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let envelope = match serde_json::from_str::<Request>(&line) {
                Ok(request) => service.dispatch(request).await,
                Err(e) => Envelope::failure(&BridgeError::InvalidArgument(format!(
                    "malformed request: {}",
                    e
                ))),
            };
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    let _ = tx.send(json);
                }
                Err(e) => error!("Failed to encode response: {}", e),
            }
        });
    }

    info!("Shutting down");
    prewarmer.stop();
    drop(tx);
    let _ = writer.await;
    info!("ticketing-bridge stopped");

    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
