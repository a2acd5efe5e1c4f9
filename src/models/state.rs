use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{registries, registry};
use crate::error::{Error, Result};
use crate::store::{NodeRecord, NodeStore, NodeType};

/// A named lifecycle tag such as `draft` or `deployed`.
///
/// States are independent of version history: an asset version carries the
/// name of its state, and the same state can tag many versions of many assets.
/// Two lookups of the same name yield the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateItem {
    uuid: Uuid,
    name: String,
}

impl StateItem {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn get_or_create(store: &dyn NodeStore, name: &str) -> Result<Self> {
        let folder = registry(store, registries::STATES)?;
        let record = match store.get_child(folder.uuid, name)? {
            Some(record) => record,
            None => {
                tracing::debug!("Creating state '{}'", name);
                store.create_node(folder.uuid, name, NodeType::State)?
            }
        };
        Self::from_record(record)
    }

    pub(crate) fn lookup(store: &dyn NodeStore, name: &str) -> Result<Option<Self>> {
        let folder = registry(store, registries::STATES)?;
        store
            .get_child(folder.uuid, name)?
            .map(Self::from_record)
            .transpose()
    }

    pub(crate) fn from_record(record: NodeRecord) -> Result<Self> {
        if record.node_type != NodeType::State {
            return Err(Error::NotFound(format!(
                "node {} is a {}, not a state",
                record.uuid,
                record.node_type.as_str()
            )));
        }
        Ok(Self {
            uuid: record.uuid,
            name: record.name,
        })
    }
}

impl fmt::Display for StateItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
