//! Hierarchical node store the repository is layered on.
//!
//! The store knows nothing about packages or rules. It keeps a tree of named,
//! typed nodes with properties, and can freeze a node into an immutable,
//! numbered version. Everything above it (baselines, state filters, moves) is
//! expressed with these primitives.

mod schema;
mod sqlite;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub use sqlite::SqliteNodeStore;

/// Primary type tag of a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Folder,
    Package,
    Asset,
    Function,
    State,
    Category,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Package => "package",
            Self::Asset => "asset",
            Self::Function => "function",
            Self::State => "state",
            Self::Category => "category",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "folder" => Some(Self::Folder),
            "package" => Some(Self::Package),
            "asset" => Some(Self::Asset),
            "function" => Some(Self::Function),
            "state" => Some(Self::State),
            "category" => Some(Self::Category),
            _ => None,
        }
    }
}

/// A typed property value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Date(DateTime<Utc>),
    Reference(Uuid),
    References(Vec<Uuid>),
    Strings(Vec<String>),
}

impl PropertyValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Self::Strings(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_references(&self) -> Option<&[Uuid]> {
        match self {
            Self::References(v) => Some(v),
            Self::Reference(u) => Some(std::slice::from_ref(u)),
            _ => None,
        }
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

/// A live node in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub uuid: Uuid,
    /// `None` only for the store root.
    pub parent: Option<Uuid>,
    pub name: String,
    pub node_type: NodeType,
    pub created_at: DateTime<Utc>,
}

/// A child as it was when its parent was checkpointed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrozenChild {
    pub uuid: Uuid,
    pub name: String,
    pub node_type: NodeType,
    /// Head version of the child at checkpoint time, if it had one.
    pub version: Option<u64>,
}

/// An immutable snapshot of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    pub uuid: Uuid,
    /// The node this version belongs to.
    pub node: Uuid,
    pub number: u64,
    pub label: String,
    pub name: String,
    pub node_type: NodeType,
    pub properties: Properties,
    pub children: Vec<FrozenChild>,
    /// Head version of every node referenced from a property, at checkpoint time.
    pub pins: BTreeMap<Uuid, u64>,
    pub created_at: DateTime<Utc>,
}

/// Adapter contract between the repository and the physical store.
///
/// All mutations are pending until [`NodeStore::save`]; they are visible to
/// reads through the same store immediately.
pub trait NodeStore: Send + Sync {
    /// The root node, created on first use.
    fn root(&self) -> Result<NodeRecord>;

    fn create_node(&self, parent: Uuid, name: &str, node_type: NodeType) -> Result<NodeRecord>;
    fn get_node(&self, uuid: Uuid) -> Result<NodeRecord>;
    fn get_child(&self, parent: Uuid, name: &str) -> Result<Option<NodeRecord>>;
    /// Live children, ordered by name.
    fn children(&self, parent: Uuid) -> Result<Vec<NodeRecord>>;

    /// Removes the live node and its live descendants. Version history is kept.
    fn remove_node(&self, uuid: Uuid) -> Result<()>;
    fn move_node(&self, uuid: Uuid, new_parent: Uuid) -> Result<()>;

    fn get_property(&self, node: Uuid, key: &str) -> Result<Option<PropertyValue>>;
    fn properties(&self, node: Uuid) -> Result<Properties>;
    /// `None` removes the property.
    fn set_property(&self, node: Uuid, key: &str, value: Option<PropertyValue>) -> Result<()>;

    /// Freeze the node's current state as the next version of its lineage.
    fn checkpoint_version(&self, node: Uuid, label: &str) -> Result<VersionRecord>;
    /// All versions of a lineage, oldest first.
    fn list_versions(&self, node: Uuid) -> Result<Vec<VersionRecord>>;
    fn get_version(&self, node: Uuid, number: u64) -> Result<VersionRecord>;
    fn get_version_by_label(&self, node: Uuid, label: &str) -> Result<VersionRecord>;
    fn head_version(&self, node: Uuid) -> Result<Option<u64>>;

    /// Commit all pending mutations.
    fn save(&self) -> Result<()>;
    /// Drop all pending mutations.
    fn discard(&self) -> Result<()>;
}
