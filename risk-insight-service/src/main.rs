use risk_insight_service::config::ServiceConfig;
use risk_insight_service::service::{AppState, build_orchestrator, create_app};
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let api_key = match std::env::var("OPENROUTER_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_API_KEY environment variable is required");
            std::process::exit(1);
        }
    };

    let config = ServiceConfig::from_env();
    let state = AppState::new(build_orchestrator(&config, &api_key));

    let app = create_app(state);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Cancer Risk Insight Service starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Analysis endpoint: POST http://{}/analyze", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
