//! Poll BOINC clients and stream their tasks to the browser, or follow such a stream
use boinc_monitor::cli::{Mode, configure_cli};
use boinc_monitor::config::{Config, load_config};
use boinc_monitor::pool::{ListenerPool, until_stopped};
use boinc_monitor::protocol::BoincClient;
use boinc_monitor::server::{AppState, create_app};
use boinc_monitor::watch::consume_sse;
use env_logger::Env;
use log::{info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let cli = configure_cli();
    let config = load_config(cli.config.as_deref())?;
    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    match cli.mode {
        Mode::Serve => serve(config).await?,
        Mode::Watch { url } => consume_sse(&url).await?,
    }

    Ok(())
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error + 'static>> {
    let clients: Vec<BoincClient> = config
        .clients
        .iter()
        .cloned()
        .map(BoincClient::from)
        .collect();
    let pool = Arc::new(ListenerPool::new(clients, config.poll_interval()));
    pool.start();

    let handler_pool = Arc::clone(&pool);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, gracefully shutting down...");
        handler_pool.stop();
    })?;

    if !config.static_dir.is_dir() {
        warn!(
            "static directory {} does not exist, only /results will be served",
            config.static_dir.display()
        );
    }
    let state = AppState {
        pool: Arc::clone(&pool),
    };
    let app = create_app(state, &config.static_dir);

    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on http://{address}");
    info!("  GET    /health                - health check");
    info!("  GET    /results               - server side events of all hosts");
    info!("  GET    /                      - dashboard");

    let mut stopped = pool.stopped();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { until_stopped(&mut stopped).await })
        .await?;

    Ok(())
}
