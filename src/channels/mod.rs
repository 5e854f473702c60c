//! Channel adapters and the registry the daemon builds at startup.
//!
//! A channel is anything that can deliver text to a person: the local
//! `steward-ctl` socket, a chat platform bot, or the outbox file. The
//! dispatcher only ever talks to [`ChannelRegistry`].

pub mod outbox;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Boxed future returned by [`Channel`] methods.
pub type ChannelFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Callback invoked for every inbound message:
/// `(platform, chat_id, from, text) -> receipt`.
pub type InboundHandler = Arc<
    dyn Fn(String, String, String, String) -> Pin<Box<dyn Future<Output = String> + Send>>
        + Send
        + Sync,
>;

/// Interface implemented by every channel adapter.
pub trait Channel: Send + Sync {
    /// Registry key, also used as the `platform` of inbound messages.
    fn name(&self) -> &str;

    /// Begin receiving messages; inbound traffic is passed to `on_message`.
    ///
    /// Implementations spawn their own listener and return once it is up.
    fn start(&self, cancel: CancellationToken, on_message: InboundHandler) -> ChannelFuture<'_>;

    /// Stop receiving and release resources.
    fn stop(&self) -> ChannelFuture<'_>;

    /// Deliver `text` to one recipient.
    fn send<'a>(&'a self, to: &'a str, text: &'a str) -> ChannelFuture<'a>;

    /// Deliver `text` to every recipient the channel knows about.
    fn broadcast<'a>(&'a self, text: &'a str) -> ChannelFuture<'a>;
}

/// Named set of channels plus a fallback for failed direct sends.
pub struct ChannelRegistry {
    channels: BTreeMap<String, Arc<dyn Channel>>,
    fallback: String,
}

impl ChannelRegistry {
    /// Create an empty registry whose fallback is the channel named `fallback`.
    #[must_use]
    pub fn new(fallback: &str) -> Self {
        Self {
            channels: BTreeMap::new(),
            fallback: fallback.to_owned(),
        }
    }

    /// Add a channel, replacing any previous one with the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_owned();
        if self.channels.insert(name.clone(), channel).is_some() {
            warn!(channel = %name, "channel re-registered, previous adapter replaced");
        }
    }

    /// Look up a channel by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    /// Registered channel names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Start every channel with the shared inbound handler.
    ///
    /// # Errors
    ///
    /// Returns the first start failure; channels started before it keep
    /// running until [`ChannelRegistry::stop_all`].
    pub async fn start_all(&self, cancel: &CancellationToken, on_message: &InboundHandler) -> Result<()> {
        for (name, channel) in &self.channels {
            channel
                .start(cancel.child_token(), Arc::clone(on_message))
                .await
                .map_err(|err| AppError::Channel(format!("failed to start {name}: {err}")))?;
            info!(channel = %name, "channel started");
        }
        Ok(())
    }

    /// Stop every channel, logging failures.
    pub async fn stop_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(err) = channel.stop().await {
                warn!(channel = %name, %err, "channel stop failed");
            }
        }
    }

    /// Deliver `text` to `to` on `platform`, falling back to the fallback
    /// channel when the direct send fails.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` when both the direct and fallback sends
    /// fail.
    pub async fn send(&self, platform: &str, to: &str, text: &str) -> Result<()> {
        let direct = match self.channels.get(platform) {
            Some(channel) => channel.send(to, text).await,
            None => Err(AppError::Channel(format!("unknown channel {platform}"))),
        };

        let Err(err) = direct else {
            return Ok(());
        };
        if platform == self.fallback {
            return Err(err);
        }

        warn!(%platform, %to, %err, fallback = %self.fallback, "direct send failed, using fallback");
        let fallback = self.channels.get(&self.fallback).ok_or_else(|| {
            AppError::Channel(format!(
                "send via {platform} failed ({err}) and fallback {} is not registered",
                self.fallback
            ))
        })?;
        fallback.send(&format!("{platform}:{to}"), text).await
    }

    /// Broadcast `text` on every channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` only when channels are registered and
    /// every one of them failed.
    pub async fn broadcast(&self, text: &str) -> Result<()> {
        let mut failures = Vec::new();
        for (name, channel) in &self.channels {
            if let Err(err) = channel.broadcast(text).await {
                warn!(channel = %name, %err, "broadcast failed");
                failures.push(format!("{name}: {err}"));
            }
        }
        if !self.channels.is_empty() && failures.len() == self.channels.len() {
            return Err(AppError::Channel(format!(
                "broadcast failed everywhere: {}",
                failures.join("; ")
            )));
        }
        Ok(())
    }
}
