use clap::Parser;

use ogc_gatekeeper::config;
use ogc_gatekeeper::state::AppState;

/// Permission-filtering OGC reverse proxy.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
    /// Listen port
    #[arg(long, default_value_t = 9090)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = config::settings().clone();
    tracing::info!(tenant = %settings.tenant, "starting OGC gatekeeper");

    let state = AppState::new(settings);
    let app = ogc_gatekeeper::app(state);

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));
    tracing::info!("listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}
