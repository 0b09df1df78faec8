use super::{SchemaValidator, ServiceConfig};
use crate::domain::params::PaginationSettings;
use crate::domain::populate::PopulateRule;
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// File form of a populate rule: either just the action name (`"users.get"`)
/// or an object with static params and cascading populate fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PopulateDefinition {
    Action(String),
    Detailed {
        action: String,
        #[serde(default)]
        params: Map<String, JsonValue>,
        #[serde(default)]
        populate: Vec<String>,
    },
}

/// File form of a [`ServiceConfig`].
///
/// ```json
/// {
///   "name": "posts",
///   "fields": ["id", "title", "author", "votes"],
///   "populates": { "author": { "action": "users.get", "params": { "fields": "id name" } } },
///   "pageSize": 20,
///   "entityValidator": { "title": "string", "votes": "number?" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub populates: BTreeMap<String, PopulateDefinition>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub max_page_size: Option<u64>,
    #[serde(default)]
    pub max_limit: Option<u64>,
    #[serde(default)]
    pub entity_validator: Option<BTreeMap<String, String>>,
}

impl ServiceDefinition {
    /// Builds the runtime configuration. Pagination values not given here
    /// fall back to `defaults`.
    pub fn into_config(self, defaults: &PaginationSettings) -> anyhow::Result<ServiceConfig> {
        if self.name.trim().is_empty() {
            bail!("service name must not be empty");
        }

        let pagination = PaginationSettings {
            default_page_size: self.page_size.unwrap_or(defaults.default_page_size),
            max_page_size: self.max_page_size.unwrap_or(defaults.max_page_size),
            max_limit: self.max_limit.unwrap_or(defaults.max_limit),
        };

        let mut config = ServiceConfig::new(self.name.clone())
            .fields(self.fields)
            .pagination(pagination);

        if let Some(id_field) = self.id_field {
            config = config.id_field(id_field);
        }

        for (field, populate) in self.populates {
            let rule = match populate {
                PopulateDefinition::Action(action) => PopulateRule::remote(action),
                PopulateDefinition::Detailed { action, params, populate } => {
                    PopulateRule::remote(action).with_params(params).with_nested(populate)
                }
            };
            config = config.populate(field, rule);
        }

        if let Some(schema) = self.entity_validator {
            let validator = SchemaValidator::from_schema(&schema)
                .map_err(|e| anyhow!("service '{}': {}", self.name, e))?;
            config = config.validator(validator);
        }

        Ok(config)
    }
}
