use dictamesh_web::{AppState, Config, build_mesh, router};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(listen = %config.listen, demo = config.demo, "starting dictamesh");

    let mesh = match build_mesh(&config).await {
        Ok(mesh) => mesh,
        Err(err) => {
            error!(%err, "mesh startup failed");
            std::process::exit(1);
        }
    };

    let state = AppState::new(&mesh, &config);
    let app = router(state);

    let listener = match TcpListener::bind(&config.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, listen = %config.listen, "bind failed");
            std::process::exit(1);
        }
    };
    info!(listen = %config.listen, "serving");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });
    if let Err(err) = serve.await {
        error!(%err, "server error");
    }

    mesh.shutdown().await;
}
