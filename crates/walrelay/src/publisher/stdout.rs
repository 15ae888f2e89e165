//! Stdout adapter, one JSON line per event. Meant for development and for
//! inspecting a stream without a bus at hand.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::Publisher;
use crate::common::{ChangeEvent, Result};

/// Writes `<topic>\t<event json>` lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutPublisher;

#[async_trait]
impl Publisher for StdoutPublisher {
    async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()> {
        let mut line = Vec::with_capacity(256);
        line.extend_from_slice(topic.as_bytes());
        line.push(b'\t');
        serde_json::to_writer(&mut line, event)?;
        line.push(b'\n');

        let mut stdout = tokio::io::stdout();
        stdout.write_all(&line).await?;
        stdout.flush().await?;
        Ok(())
    }
}
