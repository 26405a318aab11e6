//! Local agent state, kept on disk so a restarted agent resumes where it was.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::monitor::NodeId;
use crate::state::NodeState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeeperState {
    pub node_id: NodeId,
    pub formation: String,
    pub group: u32,
    /// Last state whose procedure completed.
    pub current_state: NodeState,
    /// Last goal received from the monitor.
    pub goal_state: NodeState,
}

impl KeeperState {
    /// Read the state file. A missing file means a fresh node.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Write through a temporary file and rename, so readers never see a torn file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    }
}
