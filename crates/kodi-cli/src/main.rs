//! Kodi command-line client
//!
//! Thin front end over `kodi-rpc`: call any JSON-RPC method, list the methods
//! a Kodi instance exposes, or stream its notifications.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kodi_rpc::{
    ClientConfig, EVENT_CLOSE, EVENT_OPEN, Error, KodiClient, Listener, default_config_path,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Kodi JSON-RPC client
#[derive(Parser)]
#[command(name = "kodi")]
#[command(about = "Talk to a Kodi media center over its JSON-RPC WebSocket")]
#[command(version)]
#[command(after_help = "\
Examples:
  kodi url                                  Print the WebSocket address in use
  kodi methods                              List every method Kodi exposes
  kodi methods Player                       List methods in the Player namespace
  kodi call JSONRPC.Version                 Call a method without params
  kodi call Player.PlayPause '{\"playerid\":1}'
  kodi listen Player.OnPlay Player.OnStop   Print notifications as they arrive
  kodi --host htpc --port 9090 listen System.OnQuit --once
")]
struct Cli {
    /// Kodi host (overrides config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Kodi WebSocket port (overrides config file)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Config file (defaults to `~/.config/kodi-rpc/config.json`)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Give up on a call after this many milliseconds
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the endpoint address
    Url,

    /// Call a method and print its result
    Call {
        /// Fully qualified method name (e.g. `Player.PlayPause`)
        method: String,
        /// Params as a JSON value
        params: Option<String>,
    },

    /// List discovered methods
    Methods {
        /// Only list this namespace
        namespace: Option<String>,
    },

    /// Print notifications until interrupted
    Listen {
        /// Notification names (e.g. `Player.OnPlay`), or error/close
        #[arg(required = true)]
        events: Vec<String>,
        /// Exit after the first notification of each event
        #[arg(long)]
        once: bool,
    },
}

/// Set up logging.
/// In debug builds, also logs to a timestamped file in the temp directory.
fn setup_logging(verbose: bool) {
    let default_level = if verbose || cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("kodi={default_level},kodi_rpc={default_level}"))
    });

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("kodi-cli-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();
    } else {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut config = ClientConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    debug!("Loaded config from {}", path.display());

    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Url => run_url(&config),
        Commands::Call { method, params } => run_call(&config, &method, params.as_deref()).await,
        Commands::Methods { namespace } => run_methods(&config, namespace.as_deref()).await,
        Commands::Listen { events, once } => run_listen(&config, &events, once).await,
    }
}

/// Connect to Kodi. When `needs_api` is false a failed discovery is only
/// reported, since plain calls do not use the method listing.
async fn connect(config: &ClientConfig, needs_api: bool) -> Result<KodiClient> {
    let client = KodiClient::new(config);
    let url = client
        .url()
        .context("No Kodi address configured (set --host and --port)")?;

    match client.connect().await {
        Ok(()) => {}
        Err(Error::Discovery(reason)) if !needs_api => {
            warn!("Method discovery failed, continuing without it: {}", reason);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to connect to Kodi at {url}"));
        }
    }
    info!("Connected to {}", url);
    Ok(client)
}

fn run_url(config: &ClientConfig) -> Result<()> {
    let Some(url) = config.url() else {
        bail!("No Kodi address configured (set --host and --port)");
    };
    println!("{url}");
    Ok(())
}

fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|raw| {
        serde_json::from_str(raw).with_context(|| format!("Params are not valid JSON: {raw}"))
    })
    .transpose()
}

async fn run_call(config: &ClientConfig, method: &str, params: Option<&str>) -> Result<()> {
    let params = parse_params(params)?;
    let result = call_method(config, method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn call_method(config: &ClientConfig, method: &str, params: Option<Value>) -> Result<Value> {
    let client = connect(config, false).await?;

    let result = client
        .execute(method, params)
        .await
        .with_context(|| format!("{method} failed"))?;

    client.disconnect();
    Ok(result)
}

async fn run_methods(config: &ClientConfig, namespace: Option<&str>) -> Result<()> {
    let client = connect(config, true).await?;
    let api = client.api();

    if api.is_empty() {
        println!("No methods discovered.");
        return Ok(());
    }

    match namespace {
        Some(ns) => {
            let Some(methods) = api.namespace(ns) else {
                bail!("Unknown namespace: {ns}");
            };
            for name in methods.keys() {
                println!("{ns}.{name}");
            }
        }
        None => {
            for handle in api.iter() {
                println!("{}", handle.method());
            }
            println!(
                "\n{} methods in {} namespaces",
                api.len(),
                api.namespaces().count()
            );
        }
    }

    client.disconnect();
    Ok(())
}

fn check_listen_events(events: &[String]) -> Result<()> {
    if events.iter().any(|e| e == EVENT_OPEN) {
        bail!("`{EVENT_OPEN}` fires before listening starts; it cannot be listened for");
    }
    Ok(())
}

async fn run_listen(config: &ClientConfig, events: &[String], once: bool) -> Result<()> {
    check_listen_events(events)?;
    let client = connect(config, false).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Option<Value>)>();

    for event in events {
        let tx = tx.clone();
        let name = event.clone();
        let listener = Listener::new(move |params| {
            let _ = tx.send((name.clone(), params.cloned()));
        });
        client.on(event, &listener)?;
    }

    drop(tx);

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
    client.once(
        EVENT_CLOSE,
        &Listener::new(move |_| {
            let _ = closed_tx.send(());
        }),
    )?;

    // One-shot subscriptions deliver without params, so `--once` is tracked here.
    let mut pending: HashSet<&str> = events.iter().map(String::as_str).collect();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            biased;
            delivery = rx.recv() => {
                let Some((event, params)) = delivery else { break };
                if once && !pending.remove(event.as_str()) {
                    continue;
                }
                let line = serde_json::json!({ "event": event, "params": params });
                println!("{line}");
                if once && pending.is_empty() {
                    break;
                }
            }
            _ = closed_rx.recv() => {
                eprintln!("Connection closed");
                break;
            }
            _ = &mut ctrl_c => break,
        }
    }

    client.disconnect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::try_parse_from([
            "kodi",
            "--host",
            "htpc",
            "call",
            "Player.PlayPause",
            r#"{"playerid":1}"#,
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("htpc"));
        match cli.command {
            Commands::Call { method, params } => {
                assert_eq!(method, "Player.PlayPause");
                assert_eq!(params.as_deref(), Some(r#"{"playerid":1}"#));
            }
            _ => panic!("Expected call command"),
        }
    }

    #[test]
    fn test_listen_requires_events() {
        assert!(Cli::try_parse_from(["kodi", "listen"]).is_err());
        let cli = Cli::try_parse_from(["kodi", "listen", "Player.OnPlay", "--once"]).unwrap();
        assert!(matches!(cli.command, Commands::Listen { once: true, .. }));
    }

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params(None).unwrap(), None);
        assert_eq!(
            parse_params(Some(r#"{"playerid":1}"#)).unwrap(),
            Some(serde_json::json!({"playerid": 1}))
        );
        assert!(parse_params(Some("{oops")).is_err());
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let cli = Cli::try_parse_from([
            "kodi",
            "--config",
            "/nonexistent/kodi-rpc/config.json",
            "--port",
            "9090",
            "--timeout-ms",
            "250",
            "url",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 9090);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_listen_rejects_open_event() {
        let events = vec!["Player.OnPlay".to_string(), EVENT_OPEN.to_string()];
        assert!(check_listen_events(&events).is_err());
        assert!(check_listen_events(&["close".to_string()]).is_ok());
    }

    /// Fake endpoint whose introspection is rejected but which answers
    /// every other call with `{"ok": true}`.
    async fn spawn_kodi_without_introspection() -> u16 {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let request: Value = serde_json::from_str(text.as_str()).unwrap();
                        let reply = if request["method"] == "JSONRPC.Introspect" {
                            serde_json::json!({
                                "id": request["id"],
                                "result": {},
                                "error": {"code": -32603, "message": "Internal error."}
                            })
                        } else {
                            serde_json::json!({"id": request["id"], "result": {"ok": true}})
                        };
                        if ws.send(Message::text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_call_proceeds_when_discovery_fails() {
        let port = spawn_kodi_without_introspection().await;
        let config = ClientConfig::new("127.0.0.1", port)
            .with_request_timeout(Duration::from_secs(5));

        let result = call_method(&config, "JSONRPC.Version", None).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_methods_requires_discovery() {
        let port = spawn_kodi_without_introspection().await;
        let config = ClientConfig::new("127.0.0.1", port)
            .with_request_timeout(Duration::from_secs(5));

        assert!(connect(&config, true).await.is_err());
        assert!(connect(&config, false).await.is_ok());
    }
}
