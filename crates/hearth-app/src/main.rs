use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use hearth_core::LlmController;
use hearth_core::engine::dev::DevEngineBackend;
use hearth_core::store::prompts::JsonPromptsRepository;
use hearth_core::store::window_state::{JsonWindowStateRepository, WindowStateRepository};
use hearth_gateway::picker::NoPicker;
use hearth_gateway::{GatewayServer, tcp_endpoint};

/// Backend process of the Hearth chat client: owns the inference engine and
/// chat session, and serves the RPC channel frontend surfaces connect to.
#[derive(Parser)]
#[command(name = "hearth", version)]
struct Args {
    /// Directory holding local .gguf model files (defaults to ./models)
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Address the gateway listens on
    #[arg(long, default_value = "127.0.0.1:9557")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let models_dir = match args.models_dir {
        Some(dir) => dir,
        None => std::env::current_dir()
            .context("cannot determine working directory")?
            .join("models"),
    };
    info!(models_dir = %models_dir.display(), "starting hearth backend");

    // The deterministic dev backend stands in for a real llama binding,
    // which plugs in behind the same engine traits.
    let backend = Arc::new(DevEngineBackend::new());
    let controller = Arc::new(
        LlmController::new(backend, models_dir).with_app_version(env!("CARGO_PKG_VERSION")),
    );
    controller.scan_local_models().await;

    let prompts = Arc::new(JsonPromptsRepository::new().context("prompt library unavailable")?);
    let window_state =
        Arc::new(JsonWindowStateRepository::new().context("window-state store unavailable")?);

    let geometry = window_state.load().await;
    info!(
        width = geometry.width,
        height = geometry.height,
        maximized = geometry.is_maximized,
        "window geometry restored"
    );

    let server = GatewayServer::new(controller, Arc::new(NoPicker), prompts, window_state);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", args.listen))?;
    info!(addr = %args.listen, "gateway listening");

    loop {
        let (stream, peer) = listener.accept().await.context("gateway accept failed")?;
        info!(peer = %peer, "frontend connected");
        let connection = server.clone().serve(tcp_endpoint(stream));
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "gateway connection ended with error");
            }
        });
    }
}
