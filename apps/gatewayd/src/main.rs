use axum::routing::{get, post};
use axum::Router;
use clap::Parser;

mod bootstrap;
mod cli;
mod handlers;

use cli::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CliArgs::parse();
    let boot = bootstrap::bootstrap(args).await?;
    let global = boot.state.global.clone();

    let app = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/messages/count_tokens", post(handlers::count_tokens))
        .route("/v1/responses", post(handlers::responses))
        .route(
            "/models/gcp-vertex/v1/projects/{project}/locations/{location}/publishers/{publisher}/models/{model_action}",
            post(handlers::vertex_predict),
        )
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .route("/health/detailed", get(handlers::health_detailed))
        .route("/metrics", get(handlers::metrics))
        .with_state(boot.state.clone())
        .nest(
            "/admin/v1",
            gwcore_admin::router(boot.storage.clone(), global.admin_key_hash.clone()),
        );

    let bind = format!("{}:{}", global.host, global.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "gatewayd listening");
    axum::serve(listener, app).await?;
    Ok(())
}
