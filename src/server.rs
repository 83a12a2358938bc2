use crate::pool::{ListenerPool, SnapshotSource, until_stopped};
use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures_util::stream::Stream;
use log::{debug, warn};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;

pub struct AppState<S: SnapshotSource> {
    pub pool: Arc<ListenerPool<S>>,
}

impl<S: SnapshotSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Streams every snapshot of every host until the client leaves or the pool stops.
async fn results<S: SnapshotSource>(
    State(state): State<AppState<S>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.pool.listen();
    let mut stopped = state.pool.stopped();

    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                received = rx.recv() => received,
                _ = until_stopped(&mut stopped) => break,
            };
            match received {
                Ok(info) => match Event::default().json_data(&info) {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!("Failed to serialize snapshot of {}: {}", info.host.name, e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Listener lagged behind, skipped {} snapshots", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn create_app<S: SnapshotSource>(state: AppState<S>, static_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/results", get(results::<S>))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}
