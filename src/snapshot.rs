use crate::Result;
use serde::{Deserialize, Serialize};

/// One entry of `restic snapshots --json`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub short_id: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl Snapshot {
    /// Short identifier for log messages
    pub fn display_id(&self) -> &str {
        match &self.short_id {
            Some(short) => short,
            None => &self.id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotGroup {
    snapshots: Vec<Snapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotListing {
    Flat(Vec<Snapshot>),
    Grouped(Vec<SnapshotGroup>),
}

/// Parse snapshot JSON, accepting both the flat and the `--group-by` layout.
/// Order is preserved as printed by restic.
pub fn parse_snapshots(json: &str) -> Result<Vec<Snapshot>> {
    let json = json.trim();
    if json.is_empty() || json == "null" {
        return Ok(Vec::new());
    }

    let snapshots = match serde_json::from_str::<SnapshotListing>(json)? {
        SnapshotListing::Flat(snapshots) => snapshots,
        SnapshotListing::Grouped(groups) => groups
            .into_iter()
            .flat_map(|group| group.snapshots)
            .collect(),
    };

    Ok(snapshots)
}
