use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use smartdraft::config::Config;
use smartdraft::db::{AppState, create_pool};
use smartdraft::handlers;
use smartdraft::payments::{LemonSqueezyClient, LicenseGateway};

#[derive(Parser, Debug)]
#[command(name = "smartdraft")]
#[command(about = "SmartDraft license validation and usage metering server")]
#[command(version)]
struct Cli {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("smartdraft=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    if config.lemonsqueezy.api_key.is_empty() {
        tracing::warn!("LEMON_API_KEY is not set, provider calls will be rejected");
    }
    if config.webhook_secret.is_empty() {
        tracing::warn!("LEMON_WEBHOOK_SECRET is not set, every webhook will fail verification");
    }

    let db = create_pool(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path))?;
    tracing::info!("Database ready at {}", config.database_path);

    let gateway: Arc<dyn LicenseGateway> = Arc::new(
        LemonSqueezyClient::new(&config.lemonsqueezy)
            .context("Failed to build LemonSqueezy client")?,
    );

    let state = AppState {
        db,
        gateway,
        webhook_secret: config.webhook_secret.clone(),
        activation_instance_name: config.activation_instance_name.clone(),
    };

    let app = handlers::router()
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("SmartDraft server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
