//! PostgreSQL logical replication: protocol decoding, value coercion,
//! transaction assembly, provisioning, and the replication session.

pub mod lsn;
pub mod protocol;
pub mod publication;
pub mod session;
pub mod transaction;
pub mod value;

pub use lsn::Lsn;
pub use publication::{Provisioner, PublicationStrategy, SqlExecutor, DEFAULT_PUBLICATION};
pub use session::{
    dispatch_transaction, query_dsn, replication_dsn, ReplicationSession, SessionConfig,
};
pub use transaction::WalTransaction;
pub use value::CellValue;
