// Node registry: reads the node file, hands out snapshots for polling.
// The monitoring core never mutates nodes; edits land in the file and are
// picked up by the periodic reload.

use crate::models::Node;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct NodeFile {
    #[serde(default)]
    nodes: Vec<Node>,
}

pub struct NodeRegistry {
    path: PathBuf,
    nodes: RwLock<Vec<Node>>,
}

impl NodeRegistry {
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let s = std::fs::read_to_string(&path)?;
        let nodes = Self::parse(&s)?;
        Ok(Self {
            path,
            nodes: RwLock::new(nodes),
        })
    }

    /// Registry over a fixed node list (tests, embedding). `reload` is a
    /// no-op error for registries built this way.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self {
            path: PathBuf::new(),
            nodes: RwLock::new(nodes),
        }
    }

    /// Parse and validate a node file (e.g. for tests).
    pub fn parse(s: &str) -> anyhow::Result<Vec<Node>> {
        let file: NodeFile = toml::from_str(s)?;
        let mut seen = std::collections::HashSet::new();
        for node in &file.nodes {
            anyhow::ensure!(!node.id.is_empty(), "node id must be non-empty");
            anyhow::ensure!(
                seen.insert(node.id.clone()),
                "duplicate node id {:?}",
                node.id
            );
            anyhow::ensure!(
                !node.poll_target.host.is_empty(),
                "node {:?}: poll_target.host must be non-empty",
                node.id
            );
            anyhow::ensure!(
                (1..=31).contains(&node.reset_day),
                "node {:?}: reset_day must be 1-31, got {}",
                node.id,
                node.reset_day
            );
        }
        Ok(file.nodes)
    }

    /// Re-read the node file. On parse failure the last good snapshot is kept.
    pub fn reload(&self) -> anyhow::Result<usize> {
        let s = std::fs::read_to_string(&self.path)?;
        let nodes = Self::parse(&s)?;
        let n = nodes.len();
        *self.nodes.write().expect("registry lock poisoned") = nodes;
        Ok(n)
    }

    /// Snapshot of nodes eligible for polling.
    pub fn list_active(&self) -> Vec<Node> {
        self.nodes
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|n| n.active)
            .cloned()
            .collect()
    }

    /// Every registered node id, active or not (expiry sweeps key off this).
    pub fn list_ids(&self) -> Vec<String> {
        self.nodes
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.nodes
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }
}

/// Spawns the periodic node-file reload. Parse errors are logged and the
/// previous snapshot stays in effect.
pub fn spawn_reloader(
    registry: Arc<NodeRegistry>,
    reload_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(reload_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // first tick fires immediately; nodes are already loaded
        loop {
            tick.tick().await;
            match registry.reload() {
                Ok(n) => debug!(nodes = n, "node registry reloaded"),
                Err(e) => warn!(error = %e, "node registry reload failed; keeping last snapshot"),
            }
        }
    })
}
