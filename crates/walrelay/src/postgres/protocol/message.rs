//! pgoutput protocol messages
//!
//! The logical replication messages carried inside XLogData frames, plus
//! the two outer stream frames (XLogData, primary keepalive) and the
//! standby-status reply the client writes back.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeDelta, Utc};

use super::reader::ByteReader;
use super::DecodeError;
use crate::postgres::lsn::Lsn;

/// Seconds between the Unix epoch and the PostgreSQL epoch (2000-01-01 UTC).
const PG_EPOCH_UNIX_SECS: i64 = 946_684_800;

/// Convert a PostgreSQL timestamp (µs since 2000-01-01 UTC) to UTC time.
pub fn pg_timestamp(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
        + TimeDelta::seconds(PG_EPOCH_UNIX_SECS)
        + TimeDelta::microseconds(micros)
}

/// Current time in PostgreSQL epoch microseconds.
pub fn pg_now_micros() -> i64 {
    let pg_epoch = std::time::SystemTime::UNIX_EPOCH
        + std::time::Duration::from_secs(PG_EPOCH_UNIX_SECS as u64);
    std::time::SystemTime::now()
        .duration_since(pg_epoch)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// One decoded WAL message.
#[derive(Debug, Clone)]
pub enum WalMessage {
    Begin(BeginBody),
    Commit(CommitBody),
    /// Origin information, not used by the relay
    Origin,
    Relation(RelationBody),
    /// Type announcement, not used by the relay
    Type,
    Insert(InsertBody),
    Update(UpdateBody),
    Delete(DeleteBody),
}

/// BEGIN message
#[derive(Debug, Clone)]
pub struct BeginBody {
    /// LSN the transaction will commit at
    pub final_lsn: Lsn,
    /// Commit timestamp of the transaction
    pub timestamp: DateTime<Utc>,
    /// Transaction id
    pub xid: i32,
}

/// COMMIT message
#[derive(Debug, Clone)]
pub struct CommitBody {
    pub flags: i8,
    /// LSN of the commit; equals the Begin's `final_lsn`
    pub commit_lsn: Lsn,
    /// LSN just past the end of the transaction
    pub end_lsn: Lsn,
    pub timestamp: DateTime<Utc>,
}

/// RELATION message (table definition)
#[derive(Debug, Clone)]
pub struct RelationBody {
    pub id: i32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: i8,
    pub columns: Vec<RelationColumn>,
}

/// Column definition within a relation
#[derive(Debug, Clone)]
pub struct RelationColumn {
    /// Part of the replica identity (key)?
    pub is_key: bool,
    pub name: String,
    pub type_oid: i32,
    pub type_modifier: i32,
}

/// INSERT message
#[derive(Debug, Clone)]
pub struct InsertBody {
    pub relation_id: i32,
    pub new_tuple: Tuple,
}

/// UPDATE message
#[derive(Debug, Clone)]
pub struct UpdateBody {
    pub relation_id: i32,
    /// Old row, present with REPLICA IDENTITY FULL ('O') or when key
    /// columns changed ('K')
    pub old_tuple: Option<Tuple>,
    /// Was the old tuple a key-only tuple ('K')?
    pub old_is_key: bool,
    pub new_tuple: Tuple,
}

/// DELETE message
#[derive(Debug, Clone)]
pub struct DeleteBody {
    pub relation_id: i32,
    /// Was the old tuple a key-only tuple ('K')?
    pub old_is_key: bool,
    pub old_tuple: Tuple,
}

/// One row as sent in the WAL, positional with the declaring relation.
#[derive(Debug, Clone, Default)]
pub struct Tuple(pub Vec<TupleData>);

/// A single column slot within a tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum TupleData {
    /// SQL NULL
    Null,
    /// TOASTed and unchanged; the value was elided from the stream
    Toast,
    /// Textual PostgreSQL representation
    Text(Bytes),
}

/// XLogData ('w') frame: WAL bytes plus their position.
#[derive(Debug, Clone)]
pub struct XLogData {
    pub wal_start: Lsn,
    pub server_wal_end: Lsn,
    pub server_time: DateTime<Utc>,
    pub data: Bytes,
}

impl XLogData {
    /// Parse the body of a 'w' frame (tag already consumed).
    pub fn parse(body: &Bytes) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(body);
        let wal_start = Lsn(r.read_u64()?);
        let server_wal_end = Lsn(r.read_u64()?);
        let server_time = pg_timestamp(r.read_i64()?);
        let data = body.slice(body.len() - r.remaining()..);
        Ok(Self {
            wal_start,
            server_wal_end,
            server_time,
            data,
        })
    }
}

/// Primary keepalive ('k') frame.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryKeepalive {
    pub server_wal_end: Lsn,
    pub server_time_micros: i64,
    /// Server asks for an immediate standby status reply
    pub reply_requested: bool,
}

impl PrimaryKeepalive {
    /// Parse the body of a 'k' frame (tag already consumed).
    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(body);
        Ok(Self {
            server_wal_end: Lsn(r.read_u64()?),
            server_time_micros: r.read_i64()?,
            reply_requested: r.read_u8()? != 0,
        })
    }
}

/// Encode a standby status update ('r') advertising `write_pos`.
///
/// Flush and apply positions are reported equal to the write position; the
/// relay has no durable state of its own downstream of the slot.
pub fn standby_status_update(write_pos: Lsn) -> Bytes {
    let mut buf = BytesMut::with_capacity(34);
    buf.put_u8(b'r');
    buf.put_u64(write_pos.0);
    buf.put_u64(write_pos.0);
    buf.put_u64(write_pos.0);
    buf.put_i64(pg_now_micros());
    buf.put_u8(0); // no reply requested
    buf.freeze()
}
