//! Request context, cache invalidation and entity lifecycle hooks.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Per-call context handed through the service, the populator and the hooks.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    /// Name of the calling service, when the call came through the broker.
    pub caller: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Some(Instant::now() + timeout), caller: None }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Runs `fut` under the context deadline. `None` means the deadline passed first.
    pub async fn within<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
            None => Some(fut.await),
        }
    }
}

/// Fire-and-forget cache invalidation signal.
pub trait CacheInvalidator: Send + Sync {
    fn publish(&self, pattern: &str);
}

/// Broadcasts invalidation patterns to every subscriber.
#[derive(Clone)]
pub struct BroadcastInvalidator {
    tx: broadcast::Sender<String>,
}

impl BroadcastInvalidator {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastInvalidator {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CacheInvalidator for BroadcastInvalidator {
    fn publish(&self, pattern: &str) {
        // No subscribers is fine.
        let _ = self.tx.send(pattern.to_string());
        tracing::debug!(pattern, "cache invalidation published");
    }
}

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

impl ChangeKind {
    pub fn hook_name(self) -> &'static str {
        match self {
            Self::Created => "entityCreated",
            Self::Updated => "entityUpdated",
            Self::Removed => "entityRemoved",
        }
    }
}

/// Observers of entity mutations. Every method defaults to a no-op; a failing
/// hook is logged by the service and never fails the mutation.
#[async_trait]
pub trait EntityHooks: Send + Sync {
    async fn entity_created(&self, _doc: &JsonValue, _ctx: &Context) -> anyhow::Result<()> {
        Ok(())
    }

    async fn entity_updated(&self, _doc: &JsonValue, _ctx: &Context) -> anyhow::Result<()> {
        Ok(())
    }

    async fn entity_removed(&self, _doc: &JsonValue, _ctx: &Context) -> anyhow::Result<()> {
        Ok(())
    }
}
