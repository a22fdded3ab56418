//! Mirror tree of symlinks pointing into the mounted catalog

mod reconciler;

use serde::{Deserialize, Serialize};

pub use reconciler::{LinkReconciler, ReconcileReport};

/// When mirror links are (re)created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolicy {
    /// Create a link the first time a file is seen
    #[default]
    Once,
    /// Create links as soon as files appear, skipping known ones
    Spawn,
    /// Recreate every link on every cycle
    Always,
}

impl LinkPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPolicy::Once => "once",
            LinkPolicy::Spawn => "spawn",
            LinkPolicy::Always => "always",
        }
    }
}

impl std::fmt::Display for LinkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
