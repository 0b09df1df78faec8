pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::broker::ServiceBroker;
pub use app::connection::{AfterConnect, ConnectionManager, ConnectionState};
pub use app::entity_service::{Action, EntityService, Fetched, ListPage};
pub use app::events::{BroadcastInvalidator, CacheInvalidator, ChangeKind, Context, EntityHooks};
pub use domain::model::{EntityValidator, SchemaValidator, ServiceConfig, ServiceDefinition};
pub use domain::params::{sanitize, PaginationSettings, QueryParams};
pub use domain::populate::{PopulateHandler, PopulateRule, Populator};
pub use domain::projection::{authorize, filter_fields, Projection};
pub use domain::Entity;
pub use error::{EntityError, EntityResult};
pub use infra::invoker::{HttpInvoker, RemoteInvoker};
pub use storage::{MemoryAdapter, PostgresAdapter, StorageAdapter};
