//! pgoutput decoder
//!
//! Turns one XLogData payload into a typed [`WalMessage`]. The first byte
//! is the message tag, the remainder the body.

use bytes::Bytes;
use thiserror::Error;

use super::message::*;
use super::reader::ByteReader;
use crate::postgres::lsn::Lsn;

/// Decoder errors. All of them are protocol faults and fatal for the
/// session; a stream that produces them cannot be trusted any further.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty WAL message")]
    Empty,
    #[error("unknown message type: {0:?}")]
    UnknownMessageType(char),
    #[error("unexpected end of WAL message")]
    UnexpectedEof,
    #[error("utf8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// pgoutput message decoder
pub struct WalDecoder;

impl WalDecoder {
    /// Decode one WAL payload.
    pub fn decode(payload: &[u8]) -> Result<WalMessage, DecodeError> {
        let (&tag, body) = payload.split_first().ok_or(DecodeError::Empty)?;
        let mut r = ByteReader::new(body);

        match tag {
            b'B' => Self::decode_begin(&mut r).map(WalMessage::Begin),
            b'C' => Self::decode_commit(&mut r).map(WalMessage::Commit),
            b'O' => Ok(WalMessage::Origin),
            b'R' => Self::decode_relation(&mut r).map(WalMessage::Relation),
            b'Y' => Ok(WalMessage::Type),
            b'I' => Self::decode_insert(&mut r).map(WalMessage::Insert),
            b'U' => Self::decode_update(&mut r).map(WalMessage::Update),
            b'D' => Self::decode_delete(&mut r).map(WalMessage::Delete),
            t => Err(DecodeError::UnknownMessageType(t as char)),
        }
    }

    fn decode_begin(r: &mut ByteReader<'_>) -> Result<BeginBody, DecodeError> {
        Ok(BeginBody {
            final_lsn: Lsn(r.read_u64()?),
            timestamp: pg_timestamp(r.read_i64()?),
            xid: r.read_i32()?,
        })
    }

    fn decode_commit(r: &mut ByteReader<'_>) -> Result<CommitBody, DecodeError> {
        Ok(CommitBody {
            flags: r.read_i8()?,
            commit_lsn: Lsn(r.read_u64()?),
            end_lsn: Lsn(r.read_u64()?),
            timestamp: pg_timestamp(r.read_i64()?),
        })
    }

    fn decode_relation(r: &mut ByteReader<'_>) -> Result<RelationBody, DecodeError> {
        let id = r.read_i32()?;
        let namespace = r.read_cstring()?;
        let name = r.read_cstring()?;
        let replica_identity = r.read_i8()?;

        let column_count = r.read_i16()?;
        let mut columns = Vec::with_capacity(column_count.max(0) as usize);
        for _ in 0..column_count {
            columns.push(RelationColumn {
                is_key: r.read_u8()? != 0,
                name: r.read_cstring()?,
                type_oid: r.read_i32()?,
                type_modifier: r.read_i32()?,
            });
        }

        Ok(RelationBody {
            id,
            namespace,
            name,
            replica_identity,
            columns,
        })
    }

    fn decode_insert(r: &mut ByteReader<'_>) -> Result<InsertBody, DecodeError> {
        let relation_id = r.read_i32()?;
        if !r.consume_if(b'N') {
            return Err(DecodeError::Protocol(
                "insert without new tuple marker".into(),
            ));
        }
        Ok(InsertBody {
            relation_id,
            new_tuple: Self::decode_tuple(r)?,
        })
    }

    // The old tuple is optional: 'K' (key columns) or 'O' (full old row).
    // When neither is present the next byte is already the 'N' of the new
    // tuple, so the probes must not consume it.
    fn decode_update(r: &mut ByteReader<'_>) -> Result<UpdateBody, DecodeError> {
        let relation_id = r.read_i32()?;

        let old_is_key = r.consume_if(b'K');
        let old_is_full = !old_is_key && r.consume_if(b'O');
        let old_tuple = if old_is_key || old_is_full {
            Some(Self::decode_tuple(r)?)
        } else {
            None
        };

        if !r.consume_if(b'N') {
            return Err(DecodeError::Protocol(
                "update without new tuple marker".into(),
            ));
        }

        Ok(UpdateBody {
            relation_id,
            old_tuple,
            old_is_key,
            new_tuple: Self::decode_tuple(r)?,
        })
    }

    fn decode_delete(r: &mut ByteReader<'_>) -> Result<DeleteBody, DecodeError> {
        let relation_id = r.read_i32()?;

        let old_is_key = r.consume_if(b'K');
        if !old_is_key && !r.consume_if(b'O') {
            return Err(DecodeError::Protocol(
                "delete without old tuple marker".into(),
            ));
        }

        Ok(DeleteBody {
            relation_id,
            old_is_key,
            old_tuple: Self::decode_tuple(r)?,
        })
    }

    fn decode_tuple(r: &mut ByteReader<'_>) -> Result<Tuple, DecodeError> {
        let column_count = r.read_i16()?;
        let mut columns = Vec::with_capacity(column_count.max(0) as usize);

        for _ in 0..column_count {
            let data = match r.read_u8()? {
                b'n' => TupleData::Null,
                b'u' => TupleData::Toast,
                b't' => {
                    let len = r.read_i32()?;
                    if len < 0 {
                        return Err(DecodeError::Protocol(format!(
                            "negative tuple value length {len}"
                        )));
                    }
                    TupleData::Text(Bytes::copy_from_slice(r.read_bytes(len as usize)?))
                }
                m => {
                    return Err(DecodeError::Protocol(format!(
                        "unknown tuple marker {:?}",
                        m as char
                    )))
                }
            };
            columns.push(data);
        }

        Ok(Tuple(columns))
    }
}
