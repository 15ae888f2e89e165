//! Watch-list configuration and topic naming
//!
//! The watch list selects which tables (and which kinds of change) are
//! published, and optionally remaps the table name used in topic routing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::event::ActionKind;

/// Per-table watch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Kinds of change to publish for this table; all by default.
    #[serde(default = "all_actions")]
    pub actions: Vec<ActionKind>,
    /// Alternative table name used when building the topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            actions: all_actions(),
            mapping: None,
        }
    }
}

impl WatchConfig {
    /// Check whether this entry admits the given kind of change.
    pub fn allows(&self, kind: ActionKind) -> bool {
        self.actions.contains(&kind)
    }
}

fn all_actions() -> Vec<ActionKind> {
    vec![ActionKind::Insert, ActionKind::Update, ActionKind::Delete]
}

/// Watched tables, keyed by table name.
pub type WatchList = HashMap<String, WatchConfig>;

/// Build the topic for a table.
///
/// The effective name is the watch-list `mapping` when present, otherwise
/// the table name itself; a non-empty prefix is joined with a dot.
pub fn build_topic(prefix: &str, table: &str, watch_list: &WatchList) -> String {
    let effective = watch_list
        .get(table)
        .and_then(|w| w.mapping.as_deref())
        .unwrap_or(table);

    if prefix.is_empty() {
        effective.to_string()
    } else {
        format!("{}.{}", prefix, effective)
    }
}
