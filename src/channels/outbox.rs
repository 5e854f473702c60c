//! Append-only outbox file used as the last-resort delivery channel.

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::channels::{Channel, ChannelFuture, InboundHandler};
use crate::{AppError, Result};

/// Registry name of the outbox channel.
pub const OUTBOX_CHANNEL: &str = "outbox";

#[derive(Serialize)]
struct OutboxRecord<'a> {
    at: String,
    kind: &'a str,
    to: Option<&'a str>,
    text: &'a str,
}

/// Writes every delivery as one JSON line to a file.
pub struct OutboxChannel {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OutboxChannel {
    /// Create an outbox appending to `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn append(&self, kind: &str, to: Option<&str>, text: &str) -> Result<()> {
        let record = OutboxRecord {
            at: Utc::now().to_rfc3339(),
            kind,
            to,
            text,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| AppError::Channel(format!("cannot open outbox: {err}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|err| AppError::Channel(format!("cannot write outbox: {err}")))?;
        file.flush()
            .await
            .map_err(|err| AppError::Channel(format!("cannot flush outbox: {err}")))?;
        Ok(())
    }
}

impl Channel for OutboxChannel {
    fn name(&self) -> &str {
        OUTBOX_CHANNEL
    }

    fn start(&self, _cancel: CancellationToken, _on_message: InboundHandler) -> ChannelFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> ChannelFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    fn send<'a>(&'a self, to: &'a str, text: &'a str) -> ChannelFuture<'a> {
        Box::pin(self.append("send", Some(to), text))
    }

    fn broadcast<'a>(&'a self, text: &'a str) -> ChannelFuture<'a> {
        Box::pin(self.append("broadcast", None, text))
    }
}
