//! Wire-level pieces of the replication stream: the checked byte reader,
//! the pgoutput message types, and the decoder that ties them together.

mod decoder;
mod message;
mod reader;

pub use decoder::{DecodeError, WalDecoder};
pub use message::{
    pg_now_micros, pg_timestamp, standby_status_update, BeginBody, CommitBody, DeleteBody,
    InsertBody, PrimaryKeepalive, RelationBody, RelationColumn, Tuple, TupleData, UpdateBody,
    WalMessage, XLogData,
};
pub use reader::ByteReader;
