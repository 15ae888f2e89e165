//! Transaction assembly
//!
//! Accumulates Relation announcements and row changes between Begin and
//! Commit. The relation store outlives individual transactions: the stream
//! only re-announces a relation after a schema change or a reconnect, so
//! clearing it alongside the actions would break the next transaction.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::{ActionKind, ChangeEvent, RelayError, Result, WatchList};
use crate::postgres::lsn::Lsn;
use crate::postgres::protocol::{RelationBody, Tuple, TupleData, WalMessage};
use crate::postgres::value::CellValue;

/// A column descriptor cached from a Relation message.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: String,
    pub type_oid: i32,
    pub is_key: bool,
}

/// A cached table definition, keyed by relation id.
#[derive(Debug, Clone)]
pub struct RelationEntry {
    pub schema: String,
    pub table: String,
    pub replica_identity: i8,
    pub columns: Vec<ColumnSpec>,
}

impl From<RelationBody> for RelationEntry {
    fn from(rel: RelationBody) -> Self {
        Self {
            schema: rel.namespace,
            table: rel.name,
            replica_identity: rel.replica_identity,
            columns: rel
                .columns
                .into_iter()
                .map(|c| ColumnSpec {
                    name: c.name,
                    type_oid: c.type_oid,
                    is_key: c.is_key,
                })
                .collect(),
        }
    }
}

/// One decoded column of a row change.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub type_oid: i32,
    pub is_key: bool,
    pub value: CellValue,
}

/// One row change within a transaction.
#[derive(Debug, Clone)]
pub struct Action {
    pub schema: String,
    pub table: String,
    pub kind: ActionKind,
    pub old_columns: Vec<Column>,
    pub new_columns: Vec<Column>,
}

/// The transaction currently being assembled from the stream.
#[derive(Debug, Default)]
pub struct WalTransaction {
    /// Begin LSN of the open transaction; `Lsn(0)` until the first Begin
    /// of the session.
    pub lsn: Lsn,
    pub begin_time: Option<DateTime<Utc>>,
    pub commit_time: Option<DateTime<Utc>>,
    relations: HashMap<i32, RelationEntry>,
    pub actions: Vec<Action>,
}

impl WalTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached relation.
    pub fn relation(&self, id: i32) -> Option<&RelationEntry> {
        self.relations.get(&id)
    }

    /// Feed one decoded WAL message into the state machine.
    ///
    /// Returns `true` when the message was a Commit that closed the
    /// transaction; the caller then emits events and calls [`clear`].
    ///
    /// [`clear`]: WalTransaction::clear
    pub fn apply(&mut self, msg: WalMessage) -> Result<bool> {
        match msg {
            WalMessage::Begin(begin) => {
                debug!(lsn = %begin.final_lsn, xid = begin.xid, "begin message received");
                self.lsn = begin.final_lsn;
                self.begin_time = Some(begin.timestamp);
                self.actions.clear();
            }
            WalMessage::Commit(commit) => {
                debug!(lsn = %commit.commit_lsn, end_lsn = %commit.end_lsn, "commit message received");
                if self.lsn > Lsn(0) && self.lsn != commit.commit_lsn {
                    return Err(RelayError::MessageLost);
                }
                self.commit_time = Some(commit.timestamp);
                return Ok(true);
            }
            WalMessage::Relation(rel) => {
                debug!(relation_id = rel.id, replica = rel.replica_identity, "relation message received");
                if self.lsn == Lsn(0) {
                    return Err(RelayError::MessageLost);
                }
                self.relations.insert(rel.id, rel.into());
            }
            WalMessage::Insert(ins) => {
                let action =
                    self.build_action(ins.relation_id, None, Some(&ins.new_tuple), ActionKind::Insert)?;
                self.actions.push(action);
            }
            WalMessage::Update(upd) => {
                let action = self.build_action(
                    upd.relation_id,
                    upd.old_tuple.as_ref(),
                    Some(&upd.new_tuple),
                    ActionKind::Update,
                )?;
                self.actions.push(action);
            }
            WalMessage::Delete(del) => {
                let action =
                    self.build_action(del.relation_id, Some(&del.old_tuple), None, ActionKind::Delete)?;
                self.actions.push(action);
            }
            WalMessage::Origin | WalMessage::Type => {}
        }
        Ok(false)
    }

    /// Reset per-transaction state. The relation store persists for the
    /// life of the session.
    pub fn clear(&mut self) {
        self.begin_time = None;
        self.commit_time = None;
        self.actions.clear();
    }

    fn build_action(
        &self,
        relation_id: i32,
        old_rows: Option<&Tuple>,
        new_rows: Option<&Tuple>,
        kind: ActionKind,
    ) -> Result<Action> {
        if self.lsn == Lsn(0) {
            return Err(RelayError::MessageLost);
        }
        let rel = self
            .relations
            .get(&relation_id)
            .ok_or(RelayError::RelationNotFound(relation_id))?;

        Ok(Action {
            schema: rel.schema.clone(),
            table: rel.table.clone(),
            kind,
            old_columns: decode_columns(rel, old_rows),
            new_columns: decode_columns(rel, new_rows),
        })
    }

    /// Build the events of the closed transaction, in action order,
    /// filtered against the watch list.
    pub fn create_events(&self, watch_list: &WatchList) -> Vec<ChangeEvent> {
        let Some(commit_time) = self.commit_time else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for action in &self.actions {
            let allowed = match watch_list.get(&action.table) {
                Some(cfg) => cfg.allows(action.kind),
                None => false,
            };
            if !allowed {
                info!(
                    schema = %action.schema,
                    table = %action.table,
                    action = %action.kind,
                    "wal message was skipped by filter"
                );
                continue;
            }

            events.push(ChangeEvent {
                id: Uuid::new_v4(),
                schema: action.schema.clone(),
                table: action.table.clone(),
                action: action.kind,
                data: column_map(&action.new_columns),
                data_old: column_map(&action.old_columns),
                commit_time,
            });
        }

        events
    }
}

// Toasted slots carry no value; the column is left out of the row entirely
// rather than shadowed with a null.
fn decode_columns(rel: &RelationEntry, rows: Option<&Tuple>) -> Vec<Column> {
    let Some(rows) = rows else {
        return Vec::new();
    };

    let mut columns = Vec::with_capacity(rows.0.len());
    for (num, slot) in rows.0.iter().enumerate() {
        let Some(spec) = rel.columns.get(num) else {
            warn!(
                table = %rel.table,
                column_index = num,
                known_columns = rel.columns.len(),
                "tuple column beyond cached relation schema"
            );
            continue;
        };

        let value = match slot {
            TupleData::Toast => continue,
            TupleData::Null => CellValue::Null,
            TupleData::Text(raw) => CellValue::coerce(Some(raw), spec.type_oid, &spec.name),
        };

        columns.push(Column {
            name: spec.name.clone(),
            type_oid: spec.type_oid,
            is_key: spec.is_key,
            value,
        });
    }
    columns
}

fn column_map(columns: &[Column]) -> BTreeMap<String, CellValue> {
    columns
        .iter()
        .map(|c| (c.name.clone(), c.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::WatchConfig;
    use crate::postgres::protocol::{BeginBody, CommitBody, InsertBody, RelationColumn};
    use bytes::Bytes;

    fn begin(lsn: u64) -> WalMessage {
        WalMessage::Begin(BeginBody {
            final_lsn: Lsn(lsn),
            timestamp: crate::postgres::protocol::pg_timestamp(757_472_645_000_000),
            xid: 7,
        })
    }

    fn commit(lsn: u64) -> WalMessage {
        WalMessage::Commit(CommitBody {
            flags: 0,
            commit_lsn: Lsn(lsn),
            end_lsn: Lsn(lsn + 1),
            timestamp: crate::postgres::protocol::pg_timestamp(757_472_645_000_000),
        })
    }

    fn relation(id: i32) -> WalMessage {
        WalMessage::Relation(RelationBody {
            id,
            namespace: "public".to_string(),
            name: "t".to_string(),
            replica_identity: b'd' as i8,
            columns: vec![RelationColumn {
                is_key: true,
                name: "id".to_string(),
                type_oid: crate::postgres::value::INT4_OID,
                type_modifier: -1,
            }],
        })
    }

    fn insert(relation_id: i32, v: &str) -> WalMessage {
        WalMessage::Insert(InsertBody {
            relation_id,
            new_tuple: Tuple(vec![TupleData::Text(Bytes::copy_from_slice(v.as_bytes()))]),
        })
    }

    fn watch_all(table: &str) -> WatchList {
        let mut w = WatchList::new();
        w.insert(table.to_string(), WatchConfig::default());
        w
    }

    #[test]
    fn test_begin_insert_commit() {
        let mut tx = WalTransaction::new();
        assert!(!tx.apply(begin(100)).unwrap());
        assert!(!tx.apply(relation(1)).unwrap());
        assert!(!tx.apply(insert(1, "42")).unwrap());
        assert!(tx.apply(commit(100)).unwrap());

        let events = tx.create_events(&watch_all("t"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ActionKind::Insert);
        assert_eq!(events[0].data["id"], CellValue::Int(42));
        assert!(events[0].data_old.is_empty());
    }

    #[test]
    fn test_commit_lsn_mismatch_is_message_lost() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        assert!(matches!(tx.apply(commit(101)), Err(RelayError::MessageLost)));
    }

    #[test]
    fn test_relation_before_begin_is_message_lost() {
        let mut tx = WalTransaction::new();
        assert!(matches!(
            tx.apply(relation(1)),
            Err(RelayError::MessageLost)
        ));
    }

    #[test]
    fn test_insert_before_begin_is_message_lost() {
        let mut tx = WalTransaction::new();
        assert!(matches!(
            tx.apply(insert(1, "42")),
            Err(RelayError::MessageLost)
        ));
    }

    #[test]
    fn test_unknown_relation_is_an_error() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        assert!(matches!(
            tx.apply(insert(9, "42")),
            Err(RelayError::RelationNotFound(9))
        ));
    }

    #[test]
    fn test_relation_store_survives_clear() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        tx.apply(relation(1)).unwrap();
        tx.apply(insert(1, "1")).unwrap();
        tx.apply(commit(100)).unwrap();
        tx.clear();

        // next transaction reuses the cached relation without a new
        // Relation message
        tx.apply(begin(200)).unwrap();
        tx.apply(insert(1, "2")).unwrap();
        assert!(tx.apply(commit(200)).unwrap());
        let events = tx.create_events(&watch_all("t"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["id"], CellValue::Int(2));
    }

    #[test]
    fn test_relation_overwrite_updates_columns() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        tx.apply(relation(1)).unwrap();

        let replacement = WalMessage::Relation(RelationBody {
            id: 1,
            namespace: "public".to_string(),
            name: "t".to_string(),
            replica_identity: b'd' as i8,
            columns: vec![RelationColumn {
                is_key: true,
                name: "renamed".to_string(),
                type_oid: crate::postgres::value::INT4_OID,
                type_modifier: -1,
            }],
        });
        tx.apply(replacement).unwrap();

        tx.apply(insert(1, "5")).unwrap();
        tx.apply(commit(100)).unwrap();
        let events = tx.create_events(&watch_all("t"));
        assert!(events[0].data.contains_key("renamed"));
    }

    #[test]
    fn test_toasted_column_is_absent() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        tx.apply(WalMessage::Relation(RelationBody {
            id: 1,
            namespace: "public".to_string(),
            name: "t".to_string(),
            replica_identity: b'd' as i8,
            columns: vec![
                RelationColumn {
                    is_key: true,
                    name: "id".to_string(),
                    type_oid: crate::postgres::value::INT4_OID,
                    type_modifier: -1,
                },
                RelationColumn {
                    is_key: false,
                    name: "payload".to_string(),
                    type_oid: crate::postgres::value::TEXT_OID,
                    type_modifier: -1,
                },
            ],
        }))
        .unwrap();
        tx.apply(WalMessage::Insert(InsertBody {
            relation_id: 1,
            new_tuple: Tuple(vec![
                TupleData::Text(Bytes::from_static(b"1")),
                TupleData::Toast,
            ]),
        }))
        .unwrap();
        tx.apply(commit(100)).unwrap();

        let events = tx.create_events(&watch_all("t"));
        assert_eq!(events.len(), 1);
        assert!(events[0].data.contains_key("id"));
        assert!(!events[0].data.contains_key("payload"));
    }

    #[test]
    fn test_filter_by_table_and_action() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        tx.apply(relation(1)).unwrap();
        tx.apply(insert(1, "42")).unwrap();
        tx.apply(commit(100)).unwrap();

        // table not watched
        assert!(tx.create_events(&WatchList::new()).is_empty());

        // watched, but only for deletes
        let mut watch = WatchList::new();
        watch.insert(
            "t".to_string(),
            WatchConfig {
                actions: vec![ActionKind::Delete],
                mapping: None,
            },
        );
        assert!(tx.create_events(&watch).is_empty());
    }

    #[test]
    fn test_events_share_commit_time_and_order() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        tx.apply(relation(1)).unwrap();
        tx.apply(insert(1, "1")).unwrap();
        tx.apply(insert(1, "2")).unwrap();
        tx.apply(insert(1, "3")).unwrap();
        tx.apply(commit(100)).unwrap();

        let events = tx.create_events(&watch_all("t"));
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].commit_time == w[1].commit_time));
        let ids: Vec<i32> = events
            .iter()
            .map(|e| match e.data["id"] {
                CellValue::Int(v) => v,
                _ => panic!("expected int"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_clear_resets_times_and_actions() {
        let mut tx = WalTransaction::new();
        tx.apply(begin(100)).unwrap();
        tx.apply(relation(1)).unwrap();
        tx.apply(insert(1, "1")).unwrap();
        tx.apply(commit(100)).unwrap();
        tx.clear();

        assert!(tx.begin_time.is_none());
        assert!(tx.commit_time.is_none());
        assert!(tx.actions.is_empty());
        assert!(tx.relation(1).is_some());
        // no commit time -> no events
        assert!(tx.create_events(&watch_all("t")).is_empty());
    }
}
