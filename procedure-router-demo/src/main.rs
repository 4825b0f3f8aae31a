//! Procedure router demo server
//!
//! Serves the procedures defined in [`rpc`] over HTTP and websockets:
//!
//! ```text
//! GET  /health                 liveness probe
//! GET  /users/get?id=1         read a user
//! POST /users/create           create a user (requires `authorization`)
//! GET  /chat                   realtime chat (websocket upgrade)
//! GET  /api/admin/stats        mounted admin router (requires `authorization`)
//! ```
//!
//! The chat procedure resolves `BROKER_REST_URL` and `BROKER_REST_TOKEN` when a
//! client connects; without them the upgrade is refused with 503.

mod rpc;

use clap::Parser;
use procedure_router::{RpcConfig, http_layers, serve};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::rpc::{AppContext, create_router};

#[derive(Debug, Parser)]
#[command(name = "procedure-router-demo")]
#[command(author, version, about = "Serve the demo procedures", long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "RPC_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, env = "RPC_PORT", default_value_t = 3000)]
    port: u16,

    /// Largest accepted write body in bytes
    #[arg(long, env = "RPC_MAX_BODY_SIZE", default_value_t = 1024 * 1024)]
    max_body_size: usize,

    /// Log every realtime frame at debug level
    #[arg(long)]
    debug_frames: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn rpc_config(&self) -> RpcConfig {
        RpcConfig::new()
            .with_max_body_size(self.max_body_size)
            .with_debug_logging(self.debug_frames)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "procedure_router=debug,procedure_router_demo=debug,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.rpc_config();
    config.validate()?;

    let router = create_router(AppContext::default(), config)?;
    info!(procedures = ?router.procedures(), mounts = ?router.mounts(), "Router compiled");

    let app = router.into_axum().layer(http_layers());
    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(address = %listener.local_addr()?, "Listening for connections");

    serve(listener, app, shutdown_signal()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["procedure-router-demo"]).unwrap();
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 3000);
        assert!(!args.log_json);
        assert_eq!(args.rpc_config(), RpcConfig::default());
    }

    #[test]
    fn test_flags_reach_rpc_config() {
        let args = Args::try_parse_from([
            "procedure-router-demo",
            "--port",
            "8080",
            "--max-body-size",
            "2048",
            "--debug-frames",
        ])
        .unwrap();
        assert_eq!(args.port, 8080);

        let config = args.rpc_config();
        assert_eq!(config.max_body_size, 2048);
        assert!(config.debug_logging);
    }

    #[test]
    fn test_zero_body_size_is_rejected() {
        let args = Args::try_parse_from(["procedure-router-demo", "--max-body-size", "0"]).unwrap();
        assert!(args.rpc_config().validate().is_err());
    }
}
