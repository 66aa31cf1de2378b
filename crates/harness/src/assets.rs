//! Loaded script/style snapshots and before/after diffing

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One loaded script, stylesheet or registered block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AssetDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
        }
    }

    pub fn with_url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: Some(url.into()),
        }
    }
}

/// Assets present at one instant, in page order, with unique ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<AssetDescriptor>", into = "Vec<AssetDescriptor>")]
pub struct AssetSnapshot(Vec<AssetDescriptor>);

impl AssetSnapshot {
    /// Build a snapshot, keeping the first descriptor for each id
    pub fn new(assets: Vec<AssetDescriptor>) -> Self {
        let mut seen = HashSet::with_capacity(assets.len());
        let mut unique = Vec::with_capacity(assets.len());
        for asset in assets {
            if seen.insert(asset.id.clone()) {
                unique.push(asset);
            } else {
                warn!(id = %asset.id, "duplicate asset id in snapshot, keeping the first");
            }
        }
        Self(unique)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetDescriptor> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[AssetDescriptor] {
        &self.0
    }
}

impl From<Vec<AssetDescriptor>> for AssetSnapshot {
    fn from(assets: Vec<AssetDescriptor>) -> Self {
        Self::new(assets)
    }
}

impl From<AssetSnapshot> for Vec<AssetDescriptor> {
    fn from(snapshot: AssetSnapshot) -> Self {
        snapshot.0
    }
}

/// Descriptors of `after` whose id is absent from `before`, in `after` order
pub fn diff(before: &AssetSnapshot, after: &AssetSnapshot) -> Vec<AssetDescriptor> {
    let known: HashSet<&str> = before.iter().map(|a| a.id.as_str()).collect();
    after
        .iter()
        .filter(|a| !known.contains(a.id.as_str()))
        .cloned()
        .collect()
}

/// Scripts and styles captured together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCapture {
    pub scripts: AssetSnapshot,
    pub styles: AssetSnapshot,
}

impl AssetCapture {
    /// What was added since `earlier`
    pub fn diff_since(&self, earlier: &AssetCapture) -> AssetDiff {
        AssetDiff {
            scripts: diff(&earlier.scripts, &self.scripts),
            styles: diff(&earlier.styles, &self.styles),
        }
    }
}

/// Scripts and styles added between two captures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDiff {
    pub scripts: Vec<AssetDescriptor>,
    pub styles: Vec<AssetDescriptor>,
}

impl AssetDiff {
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.styles.is_empty()
    }
}
