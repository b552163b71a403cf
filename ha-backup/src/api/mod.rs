//! Management API of the automation platform.

pub mod home_assistant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::utils::errors::Result;

pub use home_assistant::HomeAssistantClient;

/// State of one entity, as returned by `GET /api/states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    pub fn domain(&self) -> &str {
        self.entity_id.split_once('.').map_or("", |(domain, _)| domain)
    }

    pub fn object_id(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(_, id)| id)
    }

    /// Change the local copy; push it with [`ManagementApi::update_entity`].
    pub fn set_state(&mut self, value: impl Into<String>) {
        self.state = value.into();
    }
}

/// Entities grouped by domain, then by object id.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    domains: BTreeMap<String, BTreeMap<String, Entity>>,
}

impl EntityCatalog {
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut domains: BTreeMap<String, BTreeMap<String, Entity>> = BTreeMap::new();
        for entity in entities {
            domains
                .entry(entity.domain().to_string())
                .or_default()
                .insert(entity.object_id().to_string(), entity);
        }
        Self { domains }
    }

    pub fn domain(&self, domain: &str) -> Option<&BTreeMap<String, Entity>> {
        self.domains.get(domain)
    }

    /// Look up `<domain>.<object_id>`.
    pub fn get(&self, entity_id: &str) -> Option<&Entity> {
        let (domain, object_id) = entity_id.split_once('.')?;
        self.domain(domain)?.get(object_id)
    }

    pub fn len(&self) -> usize {
        self.domains.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait ManagementApi {
    fn check_liveness(&self) -> Result<bool>;

    /// Call a service. Does not wait for the work it starts to finish.
    fn invoke_action(&self, domain: &str, action: &str) -> Result<()>;

    fn list_entities(&self) -> Result<EntityCatalog>;

    /// Push the entity's current state and attributes.
    fn update_entity(&self, entity: &Entity) -> Result<()>;
}
