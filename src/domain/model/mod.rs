//! Per-entity service configuration.
//!
//! A [`ServiceConfig`] is built once at startup, either in code with the
//! builder methods or from a [`ServiceDefinition`] loaded from a file, and is
//! read-only afterwards.

use crate::domain::params::PaginationSettings;
use crate::domain::populate::PopulateRule;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub mod definition;
pub mod validator;

pub use definition::{PopulateDefinition, ServiceDefinition};
pub use validator::{AcceptAll, EntityValidator, FieldType, SchemaValidator};

/// Immutable configuration of one entity service.
#[derive(Clone)]
pub struct ServiceConfig {
    name: String,
    id_field: String,
    fields: Vec<String>,
    populates: BTreeMap<String, PopulateRule>,
    pagination: PaginationSettings,
    validator: Arc<dyn EntityValidator>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: "id".to_string(),
            fields: Vec::new(),
            populates: BTreeMap::new(),
            pagination: PaginationSettings::default(),
            validator: Arc::new(AcceptAll),
        }
    }

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Allow-list of returnable field paths. Also the default projection.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn populate(mut self, field: impl Into<String>, rule: PopulateRule) -> Self {
        self.populates.insert(field.into(), rule);
        self
    }

    pub fn pagination(mut self, pagination: PaginationSettings) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn validator(mut self, validator: impl EntityValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_field(&self) -> &str {
        &self.id_field
    }

    pub fn allowed_fields(&self) -> &[String] {
        &self.fields
    }

    pub fn populate_rules(&self) -> &BTreeMap<String, PopulateRule> {
        &self.populates
    }

    pub fn pagination_settings(&self) -> &PaginationSettings {
        &self.pagination
    }

    pub fn entity_validator(&self) -> &dyn EntityValidator {
        self.validator.as_ref()
    }

    /// Cache namespace invalidated after every mutation.
    pub fn cache_pattern(&self) -> String {
        format!("{}.*", self.name)
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field("id_field", &self.id_field)
            .field("fields", &self.fields)
            .field("populates", &self.populates)
            .field("pagination", &self.pagination)
            .finish_non_exhaustive()
    }
}
