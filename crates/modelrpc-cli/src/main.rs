//! # modelrpc CLI Entry Point
//!
//! Runs a modelrpc server or issues a single call against one.
//!
//! ## Usage
//!
//! ```bash
//! # Serve the default model handler on 127.0.0.1:5000
//! modelrpc serve
//!
//! # Serve on all interfaces with a larger client limit
//! modelrpc serve -H 0.0.0.0 -p 9000 --max-clients 64
//!
//! # Process a model (outputs the raw JSON response)
//! modelrpc call mcp.processModel -a '{"modelData": {"name": "Test Model"}}'
//!
//! # Call any other registered method
//! modelrpc call mcp.ping -a '{"n": 1}'
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use serde_json::{Map, Value};

use modelrpc_client::{Client, ClientOptions};
use modelrpc_common::protocol::requests::generate_request_id;
use modelrpc_common::{CallContext, Component, ModelRequest, StatusChangeEvent, PROCESS_MODEL_METHOD};
use modelrpc_server::{DefaultModelHandler, PingHandler, Server, ServerOptions};

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// modelrpc - model processing over correlated JSON-RPC
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for running a server.
///
/// The server answers `mcp.processModel` with the default handler, which
/// marks every request as processed, and `mcp.ping` unless disabled.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run a modelrpc server until interrupted
struct ServeArgs {
    /// interface to bind (default 127.0.0.1)
    #[argh(option, short = 'H', default = "\"127.0.0.1\".into()")]
    host: String,

    /// port to listen on; 0 picks a free port (default 5000)
    #[argh(option, short = 'p', default = "5000")]
    port: u16,

    /// maximum simultaneous client connections (default 10)
    #[argh(option, long = "max-clients", default = "10")]
    max_clients: usize,

    /// per-connection write timeout in seconds (default 30)
    #[argh(option, long = "timeout-secs", default = "30")]
    timeout_secs: u64,

    /// do not register the mcp.ping handler
    #[argh(switch, long = "no-ping")]
    no_ping: bool,
}

/// Arguments for making a single call.
///
/// Outputs raw JSON (no pretty-printing) to stdout so the result can be
/// piped to other tools. Errors go to stderr with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on a modelrpc server
struct CallArgs {
    /// name of the method to call
    #[argh(positional)]
    method: String,

    /// JSON params for the method (default {})
    #[argh(option, short = 'a', long = "args", default = "\"{}\".into()")]
    args: String,

    /// server host (default localhost)
    #[argh(option, short = 'H', default = "\"localhost\".into()")]
    host: String,

    /// server port (default 5000)
    #[argh(option, short = 'p', default = "5000")]
    port: u16,

    /// overall time limit for the call in seconds (default 30)
    #[argh(option, long = "timeout-secs", default = "30")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `call` output clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

fn server_options(args: &ServeArgs) -> ServerOptions {
    ServerOptions::default()
        .with_host(args.host.clone())
        .with_port(args.port)
        .with_max_concurrent_clients(args.max_clients)
        .with_connection_timeout(Duration::from_secs(args.timeout_secs))
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let server = Server::new(server_options(&args));
    server.register_handler(DefaultModelHandler::new())?;
    if !args.no_ping {
        server.register_raw_handler(PingHandler)?;
    }
    tracing::info!(methods = ?server.registry().methods(), "handlers registered");

    server.on_status_change(Box::new(|event: StatusChangeEvent| match &event.error {
        Some(error) => tracing::warn!(
            from = %event.old_status,
            to = %event.new_status,
            error = %error,
            "server status changed"
        ),
        None => tracing::info!(
            from = %event.old_status,
            to = %event.new_status,
            "server status changed"
        ),
    }));

    server.start().await?;
    if let Some(addr) = server.local_addr() {
        tracing::info!("modelrpc server ready on {}", addr);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for interrupt")?;
    tracing::info!("interrupt received, shutting down");

    server.stop().await?;
    Ok(())
}

/// Turns the `--args` JSON into a model request, generating an id when the
/// caller did not give one.
fn model_request_from(mut params: Value) -> Result<ModelRequest> {
    if params.is_null() {
        params = Value::Object(Map::new());
    }
    let object = params
        .as_object_mut()
        .context("params for mcp.processModel must be a JSON object")?;
    object
        .entry("id")
        .or_insert_with(|| Value::String(generate_request_id()));
    serde_json::from_value(params).context("params do not describe a model request")
}

async fn run_call(args: CallArgs) -> Result<()> {
    let params: Value = serde_json::from_str(&args.args)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;

    let timeout = Duration::from_secs(args.timeout_secs);
    let client = Client::new(
        ClientOptions::default()
            .with_server_host(args.host)
            .with_server_port(args.port)
            .with_connection_timeout(timeout)
            .with_auto_reconnect(false),
    );
    client.start().await?;

    let ctx = CallContext::with_timeout(timeout);
    let outcome = if args.method == PROCESS_MODEL_METHOD {
        match model_request_from(params) {
            Ok(request) => client
                .process_model(&ctx, request)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|response| Ok(serde_json::to_value(response)?)),
            Err(e) => Err(e),
        }
    } else {
        client
            .call(&ctx, &args.method, params)
            .await
            .map_err(anyhow::Error::from)
    };

    client.stop().await?;

    println!("{}", serde_json::to_string(&outcome?)?);
    Ok(())
}
