//! In-process registry of entity services.
//!
//! The broker routes `"<service>.<action>"` calls to registered services and
//! is the [`RemoteInvoker`] for co-located services, so population between
//! them needs no network hop.

use crate::app::entity_service::EntityService;
use crate::app::events::Context;
use crate::error::{EntityError, EntityResult};
use crate::infra::invoker::{split_action_name, RemoteInvoker};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ServiceBroker {
    services: RwLock<BTreeMap<String, Arc<EntityService>>>,
}

impl ServiceBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An invoker that calls back into this broker. Holds a weak reference,
    /// so services owned by the broker do not keep it alive.
    pub fn invoker(self: &Arc<Self>) -> Arc<dyn RemoteInvoker> {
        Arc::new(BrokerInvoker { broker: Arc::downgrade(self) })
    }

    /// Registers a service under its configured name, replacing any previous one.
    pub async fn register(&self, service: EntityService) -> Arc<EntityService> {
        let service = Arc::new(service);
        let name = service.name().to_string();
        if self
            .services
            .write()
            .await
            .insert(name.clone(), service.clone())
            .is_some()
        {
            tracing::warn!(service = %name, "service replaced");
        } else {
            tracing::info!(service = %name, "service registered");
        }
        service
    }

    pub async fn get(&self, name: &str) -> Option<Arc<EntityService>> {
        self.services.read().await.get(name).cloned()
    }

    pub async fn services(&self) -> Vec<Arc<EntityService>> {
        self.services.read().await.values().cloned().collect()
    }

    pub async fn service_names(&self) -> Vec<String> {
        self.services.read().await.keys().cloned().collect()
    }

    /// Calls `action` on the named service.
    pub async fn call(
        &self,
        service: &str,
        action: &str,
        params: &Map<String, JsonValue>,
        ctx: &Context,
    ) -> EntityResult<JsonValue> {
        let target = self
            .get(service)
            .await
            .ok_or_else(|| EntityError::UnknownAction { action: format!("{}.{}", service, action) })?;
        target.call(action, params, ctx).await
    }
}

struct BrokerInvoker {
    broker: Weak<ServiceBroker>,
}

#[async_trait]
impl RemoteInvoker for BrokerInvoker {
    async fn call(&self, action: &str, params: Map<String, JsonValue>) -> anyhow::Result<JsonValue> {
        let (service, action_name) = split_action_name(action)?;
        let broker = self
            .broker
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("service broker has shut down"))?;
        let ctx = Context::new().with_caller(service);
        Ok(broker.call(service, action_name, &params, &ctx).await?)
    }
}
