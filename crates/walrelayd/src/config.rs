//! YAML configuration
//!
//! The watch list decides what gets published and how topics are named;
//! the publication settings decide how the source-side publications are
//! provisioned.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use walrelay::postgres::PublicationStrategy;
use walrelay::WatchList;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Watched tables; empty means publish nothing (but the single
    /// publication then covers all tables, ready to be watched)
    #[serde(default)]
    pub watch_list: WatchList,

    /// Optional prefix for every topic
    #[serde(default)]
    pub prefix_watch_list: String,

    /// single (default) or multiple
    #[serde(default)]
    pub publication_strategy: PublicationStrategy,

    /// Per-table publication prefix for the multiple strategy
    #[serde(default = "default_publication_prefix")]
    pub publication_prefix: String,
}

fn default_publication_prefix() -> String {
    "ditto".to_string()
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("open config file {}", path.display()))?;
        serde_yaml::from_reader(file)
            .with_context(|| format!("parse config file {}", path.display()))
    }
}
