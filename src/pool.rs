use crate::protocol::dto::{HostInfo, SimpleGuiInfo};
use crate::protocol::{BoincClient, RpcError};
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Snapshots a slow listener may fall behind before it skips ahead.
const LISTENER_CAPACITY: usize = 16;

/// Something that can be polled for the current state of a host.
pub trait SnapshotSource: Send + Sync + 'static {
    fn host(&self) -> HostInfo;
    fn fetch(&self) -> impl Future<Output = Result<SimpleGuiInfo, RpcError>> + Send;
}

impl SnapshotSource for BoincClient {
    fn host(&self) -> HostInfo {
        self.host_info()
    }

    async fn fetch(&self) -> Result<SimpleGuiInfo, RpcError> {
        self.simple_gui_info().await
    }
}

/// Resolves once `stopped` turns true or its sender is gone.
pub async fn until_stopped(stopped: &mut watch::Receiver<bool>) {
    loop {
        let is_stopped = *stopped.borrow_and_update();
        if is_stopped {
            return;
        }
        if stopped.changed().await.is_err() {
            return;
        }
    }
}

/// Polls every source while at least one listener is registered and fans the
/// snapshots out to all listeners.
pub struct ListenerPool<S: SnapshotSource> {
    sources: Vec<Arc<S>>,
    sleep_time: Duration,
    tx: broadcast::Sender<SimpleGuiInfo>,
    has_listeners: Notify,
    stopped: watch::Sender<bool>,
}

impl<S: SnapshotSource> ListenerPool<S> {
    pub fn new(sources: Vec<S>, sleep_time: Duration) -> Self {
        let (tx, _) = broadcast::channel(LISTENER_CAPACITY);
        let (stopped, _) = watch::channel(false);
        Self {
            sources: sources.into_iter().map(Arc::new).collect(),
            sleep_time,
            tx,
            has_listeners: Notify::new(),
            stopped,
        }
    }

    /// Register a listener. Dropping the receiver unregisters it.
    pub fn listen(&self) -> broadcast::Receiver<SimpleGuiInfo> {
        let rx = self.tx.subscribe();
        debug!(
            "Adding event listener, total count {}",
            self.tx.receiver_count()
        );
        self.has_listeners.notify_waiters();
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn stopped(&self) -> watch::Receiver<bool> {
        self.stopped.subscribe()
    }

    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.stopped.send_replace(false);
        info!("Polling {} client(s)", self.sources.len());

        self.sources
            .iter()
            .cloned()
            .map(|source| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.run_loop_for(source).await })
            })
            .collect()
    }

    pub fn stop(&self) {
        self.stopped.send_replace(true);
    }

    /// Returns false when the pool was stopped while waiting.
    async fn wait_for_listeners(&self, stopped: &mut watch::Receiver<bool>) -> bool {
        loop {
            let notified = self.has_listeners.notified();
            if *stopped.borrow() {
                return false;
            }
            if self.tx.receiver_count() > 0 {
                return true;
            }
            tokio::select! {
                _ = notified => {},
                _ = until_stopped(stopped) => return false,
            }
        }
    }

    async fn run_loop_for(&self, source: Arc<S>) {
        let host = source.host();
        let mut stopped = self.stopped();

        while self.wait_for_listeners(&mut stopped).await {
            match source.fetch().await {
                Ok(info) => {
                    if self.tx.send(info).is_err() {
                        debug!("All listeners left before {} was delivered", host.name);
                    }
                }
                Err(e) => error!("Failed to get data from {}: {}", host.name, e),
            }

            tokio::select! {
                _ = sleep(self.sleep_time) => {},
                _ = until_stopped(&mut stopped) => break,
            }
        }
        debug!("Stopped polling {}", host.name);
    }
}
