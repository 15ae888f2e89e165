//! Redis list adapter
//!
//! Appends each event to a Redis list keyed by the topic (LPUSH), so
//! consumers drain with BRPOP and get per-topic FIFO order.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::Publisher;
use crate::common::{ChangeEvent, Result};

/// Publishes events onto Redis lists.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: redis::aio::ConnectionManager,
}

impl RedisPublisher {
    /// Connect and verify the server responds.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_manager().await?;

        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        info!("connected to redis");

        Ok(Self { conn })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)?;

        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(topic, payload).await?;
        debug!(topic, event_id = %event.id, "event pushed");
        Ok(())
    }
}
