use std::path::PathBuf;

use serde::Deserialize;

/// Identity of this node within the cluster, the `[node]` table.
///
/// With no `members` the node owns every project.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    /// Unique id of this node. Required when `members` is set.
    pub id: Option<String>,
    /// Ids of every node sharing the cleanup work.
    #[serde(default)]
    pub members: Vec<String>,
}

impl NodeConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.members.is_empty() && self.id.as_deref().is_none_or(str::is_empty) {
            return Err("node.id is required when node.members is set".into());
        }
        Ok(())
    }
}

/// Local slice files, the `[slices]` table.
#[derive(Debug, Deserialize)]
pub struct SlicesConfig {
    /// Directory the slice writers store their files in.
    #[serde(default = "default_slices_root")]
    pub root: PathBuf,
}

impl Default for SlicesConfig {
    fn default() -> Self {
        Self {
            root: default_slices_root(),
        }
    }
}

fn default_slices_root() -> PathBuf {
    PathBuf::from("/var/lib/sinkbridge/slices")
}
