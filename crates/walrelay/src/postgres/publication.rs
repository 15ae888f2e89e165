//! Publication and replication-slot provisioning
//!
//! Runs once per session start, on the ordinary SQL connection. Reconciles
//! the publication(s) with the watch list and makes sure the persistent
//! replication slot exists, returning its `restart_lsn` as the position to
//! resume streaming from.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio_postgres::SimpleQueryMessage;
use tracing::{debug, info};

use crate::common::{RelayError, Result};
use crate::postgres::lsn::Lsn;

/// Publication name used by the single-publication strategy, and the
/// default per-table prefix of the multiple strategy.
pub const DEFAULT_PUBLICATION: &str = "ditto";

/// The logical decoding plugin the slot is created with.
const OUTPUT_PLUGIN: &str = "pgoutput";

/// How publications map onto the watch list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStrategy {
    /// One publication covering every watched table
    #[default]
    Single,
    /// One publication per watched table, named `{prefix}_{table}`
    Multiple,
}

/// Minimal SQL surface the provisioner needs; implemented for
/// `tokio_postgres::Client` and by in-memory fakes in tests.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run one statement, returning data rows as stringly columns.
    async fn simple_query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>>;
}

#[async_trait]
impl SqlExecutor for tokio_postgres::Client {
    async fn simple_query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let messages = tokio_postgres::Client::simple_query(self, sql).await?;
        Ok(messages
            .into_iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }
}

/// Reconciles publications and the replication slot against configuration.
pub struct Provisioner<'a, E: SqlExecutor + ?Sized> {
    db: &'a E,
}

impl<'a, E: SqlExecutor + ?Sized> Provisioner<'a, E> {
    pub fn new(db: &'a E) -> Self {
        Self { db }
    }

    /// Ensure the publications required by `strategy` cover exactly the
    /// watched tables. Returns the publication names to pass to
    /// START_REPLICATION.
    pub async fn ensure_publications(
        &self,
        strategy: PublicationStrategy,
        prefix: &str,
        tables: &[String],
    ) -> Result<Vec<String>> {
        for table in tables {
            validate_identifier(table)?;
        }

        match strategy {
            PublicationStrategy::Single => {
                self.ensure_publication_matches(DEFAULT_PUBLICATION, tables)
                    .await?;
                info!(publication = DEFAULT_PUBLICATION, "single publication is ready");
                Ok(vec![DEFAULT_PUBLICATION.to_string()])
            }
            PublicationStrategy::Multiple => {
                let prefix = if prefix.is_empty() {
                    DEFAULT_PUBLICATION
                } else {
                    prefix
                };
                validate_identifier(prefix)?;

                let mut names = Vec::with_capacity(tables.len());
                for table in sorted(tables) {
                    let name = format!("{}_{}", prefix, table);
                    self.ensure_publication_matches(&name, std::slice::from_ref(&table))
                        .await?;
                    names.push(name);
                }
                info!(count = names.len(), "multiple publications are ready");
                Ok(names)
            }
        }
    }

    /// Recreate `name` unless it already covers exactly `expected`.
    /// An empty `expected` means the publication covers all tables; such a
    /// publication is only created when missing, never recreated.
    async fn ensure_publication_matches(&self, name: &str, expected: &[String]) -> Result<()> {
        validate_identifier(name)?;

        if expected.is_empty() {
            if self.publication_exists(name).await? {
                debug!(publication = name, "all-tables publication already exists");
                return Ok(());
            }
        } else {
            let current = self.current_publication_tables(name).await?;
            if tables_match(expected, &current) {
                debug!(publication = name, "publication already matches watched tables");
                return Ok(());
            }
        }

        info!(publication = name, "recreating publication");
        self.db
            .simple_query(&format!("DROP PUBLICATION IF EXISTS {};", name))
            .await?;

        let spec = if expected.is_empty() {
            "FOR ALL TABLES".to_string()
        } else {
            format!("FOR TABLE {}", sorted(expected).join(", "))
        };
        let create = format!("CREATE PUBLICATION {} {};", name, spec);
        debug!(sql = %create, "creating publication");
        self.db.simple_query(&create).await?;

        Ok(())
    }

    async fn publication_exists(&self, name: &str) -> Result<bool> {
        let rows = self
            .db
            .simple_query(&format!(
                "SELECT pubname FROM pg_publication WHERE pubname = '{}'",
                escape_literal(name)
            ))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn current_publication_tables(&self, name: &str) -> Result<Vec<String>> {
        let rows = self
            .db
            .simple_query(&format!(
                "SELECT tablename FROM pg_publication_tables WHERE pubname = '{}' ORDER BY tablename",
                escape_literal(name)
            ))
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    /// Make sure the persistent slot exists and return its `restart_lsn`.
    pub async fn ensure_slot(&self, slot: &str) -> Result<Lsn> {
        validate_identifier(slot)?;

        if self.slot_restart_lsn(slot).await?.is_none() {
            info!(slot, "creating replication slot");
            self.db
                .simple_query(&format!(
                    "SELECT pg_create_logical_replication_slot('{}', '{}')",
                    escape_literal(slot),
                    OUTPUT_PLUGIN
                ))
                .await?;
        }

        let restart_lsn = self.slot_restart_lsn(slot).await?.ok_or_else(|| {
            RelayError::replication(format!("replication slot {slot} has no restart_lsn"))
        })?;

        info!(slot, %restart_lsn, "replication slot is ready");
        Ok(restart_lsn)
    }

    async fn slot_restart_lsn(&self, slot: &str) -> Result<Option<Lsn>> {
        let rows = self
            .db
            .simple_query(&format!(
                "SELECT restart_lsn FROM pg_replication_slots WHERE slot_name = '{}'",
                escape_literal(slot)
            ))
            .await?;

        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .map(|raw| {
                raw.parse::<Lsn>()
                    .map_err(RelayError::replication)
            })
            .transpose()
    }
}

/// Reject anything that is not a plain PostgreSQL identifier before it is
/// spliced into DDL. 63 bytes is NAMEDATALEN - 1.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(RelayError::config(format!("invalid identifier: {name:?}")))
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

fn tables_match(expected: &[String], current: &[String]) -> bool {
    let expected: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let current: HashSet<&str> = current.iter().map(String::as_str).collect();
    expected == current
}

fn sorted(tables: &[String]) -> Vec<String> {
    let mut out = tables.to_vec();
    out.sort();
    out
}
