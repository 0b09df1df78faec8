//! Adapter lifecycle: connect with unbounded retry, disconnect on shutdown.
//!
//! State moves `Disconnected -> Connecting -> Connected`, back to
//! `Disconnected` on an explicit stop, or back to `Connecting` through
//! [`ConnectionManager::reconnect`]. The state is published on a watch
//! channel; the retry loop sleeps on it so a disconnect interrupts the backoff.

use crate::error::{EntityError, EntityResult};
use crate::storage::StorageAdapter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Runs once after every successful connect (seeding, index creation, ...).
/// A failure is logged and does not undo the connection.
#[async_trait]
pub trait AfterConnect: Send + Sync {
    async fn after_connected(&self, adapter: &dyn StorageAdapter) -> anyhow::Result<()>;
}

pub struct ConnectionManager {
    name: String,
    adapter: Arc<dyn StorageAdapter>,
    retry_interval: Duration,
    after_connect: Option<Arc<dyn AfterConnect>>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn StorageAdapter>, retry_interval: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name: name.into(),
            adapter,
            retry_interval,
            after_connect: None,
            state,
        }
    }

    pub fn with_after_connect(mut self, hook: Arc<dyn AfterConnect>) -> Self {
        self.after_connect = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connects in a background task. The task ends once connected or stopped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.connect().await {
                tracing::debug!(service = %manager.name, error = %e, "connect loop ended");
            }
        })
    }

    /// Connects, retrying every `retry_interval` until it succeeds. Returns an
    /// error only if [`disconnect`](Self::disconnect) stops the loop first.
    pub async fn connect(&self) -> EntityResult<()> {
        let started = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Disconnected {
                *s = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return self.wait_settled().await;
        }
        self.connect_loop().await
    }

    /// Drops the current connection and connects again.
    pub async fn reconnect(&self) -> EntityResult<()> {
        let previous = self.state.send_replace(ConnectionState::Connecting);
        if previous == ConnectionState::Connecting {
            return self.wait_settled().await;
        }
        tracing::warn!(service = %self.name, "connection lost, reconnecting");
        if let Err(e) = self.adapter.disconnect().await {
            tracing::debug!(service = %self.name, error = %e, "disconnect before reconnect failed");
        }
        self.connect_loop().await
    }

    /// Stops a running connect loop or closes the connection. Safe to call in any state.
    pub async fn disconnect(&self) -> EntityResult<()> {
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        match previous {
            ConnectionState::Connected => {
                self.adapter.disconnect().await?;
                tracing::info!(service = %self.name, "disconnected");
            }
            ConnectionState::Connecting => {
                tracing::info!(service = %self.name, "connect loop stopped");
            }
            ConnectionState::Disconnected => {}
        }
        Ok(())
    }

    async fn connect_loop(&self) -> EntityResult<()> {
        let mut attempt: u64 = 0;
        loop {
            if self.state() != ConnectionState::Connecting {
                return Err(stopped());
            }
            attempt += 1;

            match self.adapter.connect().await {
                Ok(()) => {
                    if let Some(hook) = &self.after_connect {
                        if let Err(e) = hook.after_connected(self.adapter.as_ref()).await {
                            tracing::error!(service = %self.name, error = %e, "after-connect hook failed");
                        }
                    }

                    let promoted = self.state.send_if_modified(|s| {
                        if *s == ConnectionState::Connecting {
                            *s = ConnectionState::Connected;
                            true
                        } else {
                            false
                        }
                    });
                    if !promoted {
                        // Stopped while the connect was in flight.
                        self.adapter.disconnect().await?;
                        return Err(stopped());
                    }
                    tracing::info!(service = %self.name, attempt, "connected");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(service = %self.name, attempt, error = %e, "connection failed");
                    tracing::warn!(
                        service = %self.name,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        "reconnecting"
                    );
                }
            }

            let mut rx = self.state.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = settle(&mut rx, |s| s == ConnectionState::Disconnected) => {
                    return Err(stopped());
                }
            }
        }
    }

    /// Waits for another caller's connect loop to finish.
    async fn wait_settled(&self) -> EntityResult<()> {
        let mut rx = self.state.subscribe();
        match settle(&mut rx, |s| s != ConnectionState::Connecting).await {
            Some(ConnectionState::Connected) => Ok(()),
            _ => Err(stopped()),
        }
    }
}

/// Resolves with the first state matching `done`; `None` if the sender is gone.
async fn settle(
    rx: &mut watch::Receiver<ConnectionState>,
    done: impl Fn(ConnectionState) -> bool,
) -> Option<ConnectionState> {
    loop {
        let current = *rx.borrow_and_update();
        if done(current) {
            return Some(current);
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

fn stopped() -> EntityError {
    EntityError::connection("connection stopped by disconnect")
}
