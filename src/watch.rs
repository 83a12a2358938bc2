use crate::protocol::dto::ActiveTask;
use crate::snapshot::{HostSnapshot, Snapshot, SnapshotError};
use futures_util::StreamExt;
use log::{info, warn};
use reqwest::Client;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::{Display, Formatter};
use thiserror::Error;
use tokio::time::{Duration, sleep};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub type TaskSnapshot = HostSnapshot<Option<ActiveTask>>;

#[derive(Debug, Error)]
pub enum SseError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Latest known state of every host seen on the event stream.
#[derive(Debug, Default)]
pub struct SnapshotBoard {
    hosts: BTreeMap<String, TaskSnapshot>,
}

impl SnapshotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// First snapshot of a host creates its entry, later ones reconcile it.
    pub fn apply(&mut self, snapshot: Snapshot<Option<ActiveTask>>) -> &TaskSnapshot {
        let name = snapshot.host.name.clone();
        match self.hosts.entry(name) {
            Entry::Occupied(entry) => {
                let host = entry.into_mut();
                host.update(snapshot);
                host
            }
            Entry::Vacant(entry) => {
                info!("New host {}", entry.key());
                entry.insert(HostSnapshot::new(snapshot))
            }
        }
    }

    pub fn apply_json(&mut self, data: &str) -> Result<&TaskSnapshot, SnapshotError> {
        let snapshot = Snapshot::from_json(data)?;
        Ok(self.apply(snapshot))
    }

    pub fn get(&self, host: &str) -> Option<&TaskSnapshot> {
        self.hosts.get(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.hosts.values()
    }
}

/// One line per host, then one indented line per result.
pub struct HostReport<'a>(pub &'a TaskSnapshot);

impl Display for HostReport<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let host = self.0;
        write!(f, "{} ({} results)", host.name(), host.len())?;
        for (name, task) in host.results() {
            match task {
                Some(task) => write!(f, "\n  {name}: {task}")?,
                None => write!(f, "\n  {name}: idle")?,
            }
        }
        Ok(())
    }
}

const FRAME_SEPARATOR: &[u8] = b"\n\n";

/// Split complete frames off the front of `buffer` and return their `data:` payloads.
/// Frames are decoded only once complete; frames that are not UTF-8 are dropped.
pub(crate) fn drain_events(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(pos) = buffer
        .windows(FRAME_SEPARATOR.len())
        .position(|window| window == FRAME_SEPARATOR)
    {
        let frame: Vec<u8> = buffer.drain(..pos + FRAME_SEPARATOR.len()).collect();
        let frame = match String::from_utf8(frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping frame that is not UTF-8: {}", e);
                continue;
            }
        };
        for line in frame.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                events.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
    }
    events
}

pub async fn consume_sse(url: &str) -> Result<(), SseError> {
    let client = Client::new();
    let mut board = SnapshotBoard::new();

    loop {
        info!("Connecting to {url}...");

        match try_consume_stream(&client, url, &mut board).await {
            Ok(_) => info!("Stream ended normally"),
            Err(e) => warn!("Stream error: {}", e),
        }

        info!("Reconnecting in {} seconds...", RECONNECT_DELAY.as_secs());
        sleep(RECONNECT_DELAY).await;
    }
}

async fn try_consume_stream(
    client: &Client,
    url: &str,
    board: &mut SnapshotBoard,
) -> Result<(), SseError> {
    let response = client.get(url).send().await?;
    let response = response.error_for_status()?;

    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        for &byte in bytes.iter() {
            // normalise CRLF line endings
            if byte == b'\n' && buffer.last() == Some(&b'\r') {
                buffer.pop();
            }
            buffer.push(byte);
        }

        for data in drain_events(&mut buffer) {
            match board.apply_json(&data) {
                Ok(host) => println!("{}", HostReport(host)),
                Err(e) => warn!("Skipping event: {}", e),
            }
        }
    }

    Ok(())
}
