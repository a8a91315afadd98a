//! On-disk graph snapshot
//!
//! The layout on disk is not contractual; only the behaviour is: nodes and
//! edges committed by `flush` survive a restart, and `clear` removes the
//! snapshot atomically.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Edge, EdgeKey, Node, NodeId};

/// Snapshot file inside the store directory.
pub const SNAPSHOT_FILE: &str = "graph.trellis";

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
pub struct SnapshotData {
    pub version: u32,
    pub saved_at: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

pub fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

/// Persist the committed graph. Writes to a temp file, then renames, so a
/// crash mid-write leaves the previous snapshot intact.
pub fn save(
    dir: &Path,
    nodes: &HashMap<NodeId, Node>,
    edges: &HashMap<EdgeKey, Edge>,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    // Sorted so that identical graphs produce identical bytes.
    let mut node_list: Vec<Node> = nodes.values().cloned().collect();
    node_list.sort_by(|a, b| a.id.cmp(&b.id));
    let mut edge_list: Vec<Edge> = edges.values().cloned().collect();
    edge_list.sort_by_key(|e| e.key());

    let data = SnapshotData {
        version: SNAPSHOT_VERSION,
        saved_at: chrono::Utc::now().to_rfc3339(),
        nodes: node_list,
        edges: edge_list,
    };

    let bytes = rmp_serde::to_vec_named(&data)?;
    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, snapshot_path(dir))?;

    tracing::debug!(
        path = %snapshot_path(dir).display(),
        nodes = data.nodes.len(),
        edges = data.edges.len(),
        "snapshot saved"
    );
    Ok(())
}

/// Load the snapshot, if present.
pub fn load(dir: &Path) -> Result<Option<SnapshotData>> {
    let path = snapshot_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)?;
    let data: SnapshotData = rmp_serde::from_slice(&bytes)?;
    if data.version != SNAPSHOT_VERSION {
        tracing::warn!(
            found = data.version,
            expected = SNAPSHOT_VERSION,
            "snapshot version mismatch, starting empty"
        );
        return Ok(None);
    }
    Ok(Some(data))
}

/// Remove the snapshot file.
pub fn remove(dir: &Path) -> Result<()> {
    let path = snapshot_path(dir);
    if path.exists() {
        fs::remove_file(&path)?;
    }
    Ok(())
}
