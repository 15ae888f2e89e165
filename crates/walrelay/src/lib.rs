//! # walrelay
//!
//! A change-data-capture relay for PostgreSQL logical replication. It
//! attaches to a replication slot, decodes the binary pgoutput stream into
//! per-row change events, filters them against a configured watch list,
//! and publishes them as JSON to a downstream bus, acknowledging the
//! applied LSN so the server can reclaim WAL.
//!
//! ```text
//! postgres ──CopyData──▶ session ──WalMessage──▶ transaction ──events──▶ publisher
//!     ▲                     │
//!     └──── standby status ─┘
//! ```
//!
//! The building blocks compose without a live connection, which is how the
//! tests drive them:
//!
//! ```
//! use walrelay::common::{build_topic, WatchConfig, WatchList};
//! use walrelay::postgres::WalTransaction;
//!
//! let mut watch = WatchList::new();
//! watch.insert("users".to_string(), WatchConfig::default());
//!
//! // payloads decoded with protocol::WalDecoder feed WalTransaction::apply;
//! // once a commit closes the transaction, create_events yields the
//! // filtered events
//! let tx = WalTransaction::new();
//! assert!(tx.create_events(&watch).is_empty());
//! assert_eq!(build_topic("cdc", "users", &watch), "cdc.users");
//! ```

pub mod common;
pub mod postgres;
pub mod publisher;

pub use common::{ActionKind, ChangeEvent, RelayError, Result, WatchConfig, WatchList};
pub use postgres::{Lsn, Provisioner, PublicationStrategy, ReplicationSession, SessionConfig};
pub use publisher::Publisher;
