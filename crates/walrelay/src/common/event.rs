//! Change event representation
//!
//! The external JSON contract of the relay: one event per row change,
//! published to a per-table topic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::postgres::value::CellValue;

/// Kind of change captured from the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Insert => write!(f, "INSERT"),
            ActionKind::Update => write!(f, "UPDATE"),
            ActionKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single row change, ready for publishing.
///
/// Field names are part of the wire contract and must not change:
/// `id`, `schema`, `table`, `action`, `data`, `dataOld`, `commitTime`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangeEvent {
    /// Unique event id (uuid v4, fresh per event)
    pub id: Uuid,
    /// Schema (namespace) of the table
    pub schema: String,
    /// Table name
    pub table: String,
    /// INSERT, UPDATE or DELETE
    pub action: ActionKind,
    /// New row state, column name -> decoded value
    pub data: BTreeMap<String, CellValue>,
    /// Old row state (UPDATE/DELETE with replica identity), column name -> decoded value
    #[serde(rename = "dataOld")]
    pub data_old: BTreeMap<String, CellValue>,
    /// Commit timestamp of the enclosing transaction; identical for all
    /// events of one transaction
    #[serde(rename = "commitTime")]
    pub commit_time: DateTime<Utc>,
}
