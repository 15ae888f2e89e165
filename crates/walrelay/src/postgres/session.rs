//! Replication session
//!
//! The single long-lived task of the relay: drives the replication duplex,
//! answers keep-alives, feeds WAL payloads through the decoder and the
//! transaction assembler, publishes the events of each committed
//! transaction, and acknowledges the applied LSN.
//!
//! Acknowledgement is independent of publish outcome: the bus is
//! downstream and a failed publish must not pin WAL on the source. The
//! relay is at-most-once with respect to the bus.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::RwLock;
use tokio::time::{timeout_at, Instant};
use tokio_postgres::{Client, CopyBothDuplex};
use tracing::{debug, error, info};

use crate::common::{build_topic, RelayError, Result, WatchList};
use crate::postgres::lsn::Lsn;
use crate::postgres::protocol::{
    standby_status_update, PrimaryKeepalive, WalDecoder, XLogData,
};
use crate::postgres::publication::validate_identifier;
use crate::postgres::transaction::WalTransaction;
use crate::publisher::Publisher;

/// Interval between standby status updates when the stream is quiet.
const STANDBY_TIMEOUT: Duration = Duration::from_secs(10);

/// What the session needs to start streaming.
pub struct SessionConfig {
    /// Slot to stream from
    pub slot_name: String,
    /// Publications to subscribe to, as returned by the provisioner
    pub publication_names: Vec<String>,
    /// Position to resume from (the slot's restart_lsn)
    pub start_lsn: Lsn,
    /// Watched tables and per-table action filters
    pub watch_list: WatchList,
    /// Optional topic prefix
    pub topic_prefix: String,
}

/// A running replication session.
pub struct ReplicationSession {
    // dropping the client tears down the stream; it is held, not used
    _client: Client,
    stream: Pin<Box<CopyBothDuplex<Bytes>>>,
    lsn: Arc<RwLock<Lsn>>,
    client_xlog_pos: Lsn,
    publisher: Arc<dyn Publisher>,
    watch_list: WatchList,
    topic_prefix: String,
    tx: WalTransaction,
}

impl ReplicationSession {
    /// Issue START_REPLICATION on an already-open replication connection
    /// (a `tokio-postgres` client connected with `replication=database`).
    pub async fn start(
        client: Client,
        config: SessionConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        validate_identifier(&config.slot_name)?;
        for name in &config.publication_names {
            validate_identifier(name)?;
        }
        if config.publication_names.is_empty() {
            return Err(RelayError::config("no publications to subscribe to"));
        }

        let query = format!(
            "START_REPLICATION SLOT {} LOGICAL {} (\"proto_version\" '1', \"publication_names\" '{}')",
            config.slot_name,
            config.start_lsn,
            config.publication_names.join(","),
        );
        debug!(sql = %query, "starting replication");

        let stream = client.copy_both_simple::<Bytes>(&query).await?;
        info!(
            slot = %config.slot_name,
            start_lsn = %config.start_lsn,
            "logical replication started"
        );

        Ok(Self {
            _client: client,
            stream: Box::pin(stream),
            lsn: Arc::new(RwLock::new(config.start_lsn)),
            client_xlog_pos: config.start_lsn,
            publisher,
            watch_list: config.watch_list,
            topic_prefix: config.topic_prefix,
            tx: WalTransaction::new(),
        })
    }

    /// Shared handle to the acknowledged LSN, for status probes.
    pub fn lsn_handle(&self) -> Arc<RwLock<Lsn>> {
        Arc::clone(&self.lsn)
    }

    /// Run the receive loop until the connection closes or a protocol
    /// fault makes the stream untrustworthy.
    pub async fn run(mut self) -> Result<()> {
        let mut next_deadline = Instant::now() + STANDBY_TIMEOUT;

        loop {
            if Instant::now() >= next_deadline {
                let pos = self.client_xlog_pos;
                self.send_standby_status(pos).await?;
                debug!(write_pos = %pos, "sent standby status message");
                next_deadline = Instant::now() + STANDBY_TIMEOUT;
            }

            let frame = match timeout_at(next_deadline, self.stream.next()).await {
                // deadline reached: loop around and send the standby status
                Err(_) => continue,
                Ok(None) => {
                    info!("replication stream ended");
                    return Err(RelayError::ConnectionClosed);
                }
                Ok(Some(frame)) => frame?,
            };

            let Some((&tag, body)) = frame.split_first() else {
                continue;
            };

            match tag {
                b'k' => {
                    let keepalive = PrimaryKeepalive::parse(body)?;
                    debug!(
                        server_wal_end = %keepalive.server_wal_end,
                        reply_requested = keepalive.reply_requested,
                        "primary keepalive message"
                    );
                    if keepalive.reply_requested {
                        // force a standby status on the next iteration
                        next_deadline = Instant::now();
                    }
                }
                b'w' => {
                    let xlog = XLogData::parse(&frame.slice(1..))?;
                    self.handle_xlog_data(xlog).await?;
                }
                other => {
                    debug!(tag = %(other as char), "ignoring unexpected stream message");
                }
            }
        }
    }

    async fn handle_xlog_data(&mut self, xlog: XLogData) -> Result<()> {
        let committed = self.tx.apply(WalDecoder::decode(&xlog.data)?)?;

        if committed {
            dispatch_transaction(
                self.publisher.as_ref(),
                &self.watch_list,
                &self.topic_prefix,
                &self.tx,
            )
            .await;
            self.tx.clear();
        }

        if xlog.wal_start > self.current_lsn().await {
            self.ack(xlog.wal_start).await?;
            debug!(lsn = %xlog.wal_start, "acknowledged wal message");
        }
        self.client_xlog_pos = xlog.wal_start.advance(xlog.data.len());

        Ok(())
    }

    /// Record `lsn` as applied and advertise it to the server.
    async fn ack(&mut self, lsn: Lsn) -> Result<()> {
        {
            let mut guard = self.lsn.write().await;
            *guard = lsn;
        }
        self.send_standby_status(lsn).await
    }

    async fn current_lsn(&self) -> Lsn {
        *self.lsn.read().await
    }

    async fn send_standby_status(&mut self, write_pos: Lsn) -> Result<()> {
        self.stream
            .send(standby_status_update(write_pos))
            .await
            .map_err(RelayError::Postgres)
    }
}

/// Publish every event of a closed transaction, in order.
///
/// A failed publish is logged and skipped; the LSN ack must not wait on the
/// bus. Returns the number of events actually delivered.
pub async fn dispatch_transaction(
    publisher: &dyn Publisher,
    watch_list: &WatchList,
    topic_prefix: &str,
    tx: &WalTransaction,
) -> usize {
    let mut delivered = 0;
    for event in tx.create_events(watch_list) {
        let topic = build_topic(topic_prefix, &event.table, watch_list);
        match publisher.publish(&topic, &event).await {
            Ok(()) => delivered += 1,
            Err(err) => {
                error!(topic = %topic, event_id = %event.id, error = %err, "failed to publish event");
            }
        }
    }
    delivered
}

/// Strip a possible `replication=database` marker so the DSN can be used
/// for an ordinary SQL connection.
pub fn query_dsn(dsn: &str) -> String {
    let cleaned = dsn
        .replace("&replication=database&", "&")
        .replace("?replication=database&", "?")
        .replace("?replication=database", "")
        .replace("&replication=database", "")
        .replace(" replication=database", "")
        .replace("replication=database ", "");
    cleaned.trim().to_string()
}

/// Make sure the DSN requests a logical replication connection.
pub fn replication_dsn(dsn: &str) -> String {
    if dsn.contains("replication=database") {
        return dsn.to_string();
    }
    if dsn.contains("://") {
        if dsn.contains('?') {
            format!("{dsn}&replication=database")
        } else {
            format!("{dsn}?replication=database")
        }
    } else {
        format!("{dsn} replication=database")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_dsn_strips_replication_marker() {
        assert_eq!(
            query_dsn("postgres://u:p@h:5432/db?replication=database"),
            "postgres://u:p@h:5432/db"
        );
        assert_eq!(
            query_dsn("postgres://u:p@h/db?replication=database&sslmode=disable"),
            "postgres://u:p@h/db?sslmode=disable"
        );
        assert_eq!(
            query_dsn("host=h user=u replication=database"),
            "host=h user=u"
        );
        assert_eq!(query_dsn("host=h user=u"), "host=h user=u");
    }

    #[test]
    fn test_replication_dsn_adds_marker_once() {
        assert_eq!(
            replication_dsn("postgres://u@h/db"),
            "postgres://u@h/db?replication=database"
        );
        assert_eq!(
            replication_dsn("postgres://u@h/db?sslmode=disable"),
            "postgres://u@h/db?sslmode=disable&replication=database"
        );
        assert_eq!(
            replication_dsn("host=h user=u"),
            "host=h user=u replication=database"
        );
        let already = "host=h replication=database";
        assert_eq!(replication_dsn(already), already);
    }
}
