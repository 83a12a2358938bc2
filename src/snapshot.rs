use crate::protocol::dto::{ActiveTask, HostInfo, SimpleGuiInfo};
use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] serde_json::Error),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ResultEntry<T> {
    pub name: String,
    pub active_task: T,
}

impl<T> ResultEntry<T> {
    pub fn new(name: impl Into<String>, active_task: T) -> Self {
        Self {
            name: name.into(),
            active_task,
        }
    }
}

/// A point-in-time report of a host and its named results. Fields other than
/// `host.name`, `results[].name` and `results[].active_task` are ignored.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub host: HostInfo,
    pub results: Vec<ResultEntry<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(host_name: impl Into<String>, results: Vec<ResultEntry<T>>) -> Self {
        Self {
            host: HostInfo::new(host_name),
            results,
        }
    }
}

impl<T: DeserializeOwned> Snapshot<T> {
    pub fn from_json(data: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(data)?)
    }
}

impl From<SimpleGuiInfo> for Snapshot<Option<ActiveTask>> {
    fn from(info: SimpleGuiInfo) -> Self {
        Self {
            host: info.host,
            results: info
                .results
                .into_iter()
                .map(|result| ResultEntry::new(result.name, result.active_task))
                .collect(),
        }
    }
}

/// Mirror of the latest snapshot of one host.
///
/// The key set of `results` always equals the result names of the most
/// recently applied snapshot. The host name is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot<T> {
    name: String,
    results: BTreeMap<String, T>,
}

impl<T> HostSnapshot<T> {
    pub fn new(snapshot: Snapshot<T>) -> Self {
        let mut results = BTreeMap::new();
        for entry in snapshot.results {
            results.insert(entry.name, entry.active_task);
        }
        Self {
            name: snapshot.host.name,
            results,
        }
    }

    /// Reconcile `results` in place against `snapshot`: entries are inserted
    /// or overwritten, keys missing from `snapshot` are removed.
    pub fn update(&mut self, snapshot: Snapshot<T>) {
        if snapshot.host.name != self.name {
            debug!(
                "ignoring host name {} reported for {}",
                snapshot.host.name, self.name
            );
        }

        let mut used = HashSet::with_capacity(snapshot.results.len());
        for entry in snapshot.results {
            used.insert(entry.name.clone());
            self.results.insert(entry.name, entry.active_task);
        }
        self.results.retain(|name, _| used.contains(name));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn results(&self) -> &BTreeMap<String, T> {
        &self.results
    }

    pub fn get(&self, result_name: &str) -> Option<&T> {
        self.results.get(result_name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
