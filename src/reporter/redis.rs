//! Redis packet delivery
//!
//! Packets are queued in memory and written by a background task, in order:
//! RPUSH onto the packet list for consumers that poll, then PUBLISH for live
//! subscribers. Failures are logged and the packet is dropped.
//! `shutdown` flushes whatever is still queued before the process exits.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Packet, Reporter};
use crate::intake::get_connection_with_retry;

pub struct RedisReporter {
    tx: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RedisReporter {
    pub async fn connect(
        redis_url: &str,
        queue: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = get_connection_with_retry(&client).await?;
        let (queue, channel) = (queue.into(), channel.into());
        info!("Reporting packets to {} / {}", queue, channel);

        Ok(Self::spawn(|rx| deliver_loop(client, conn, queue, channel, rx)))
    }

    fn spawn<F, Fut>(deliver: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedReceiver<Packet>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(deliver(rx));
        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop accepting packets and wait up to `grace` for the queue to drain
    pub async fn shutdown(&self, grace: Duration) {
        drop(self.tx.lock().take());
        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        match tokio::time::timeout(grace, handle).await {
            Ok(_) => info!("Packet queue flushed"),
            Err(_) => warn!("Packet queue not flushed within {:?}", grace),
        }
    }
}

impl Reporter for RedisReporter {
    fn deliver(&self, packet: Packet) {
        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(packet).is_ok(),
            None => false,
        };
        if !sent {
            warn!("Packet delivery task is gone; dropping packet");
        }
    }
}

impl Drop for RedisReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

async fn deliver_loop(
    client: redis::Client,
    mut conn: MultiplexedConnection,
    queue: String,
    channel: String,
    mut rx: mpsc::UnboundedReceiver<Packet>,
) {
    while let Some(packet) = rx.recv().await {
        let json = match serde_json::to_string(&packet) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize packet: {}", e);
                continue;
            }
        };

        if let Err(e) = conn.rpush::<_, _, ()>(&queue, &json).await {
            warn!("Failed to push packet: {}. Reconnecting...", e);
            match get_connection_with_retry(&client).await {
                Ok(new_conn) => conn = new_conn,
                Err(e) => {
                    warn!("Dropping packet, Redis unavailable: {}", e);
                    continue;
                }
            }
            if let Err(e) = conn.rpush::<_, _, ()>(&queue, &json).await {
                warn!("Dropping packet after retry: {}", e);
                continue;
            }
        }

        // No subscribers is not an error
        let _ = conn.publish::<_, _, ()>(&channel, &json).await;
        debug!("Delivered packet: {}", json);
    }
}
