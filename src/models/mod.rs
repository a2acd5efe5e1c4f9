//! Items stored in the rules repository.
//!
//! # Core Concepts
//!
//! ## Versioned Items
//!
//! - [`PackageItem`]: Container of rule assets and attached functions. A package
//!   is versioned on its own: [`PackageItem::create_baseline`] freezes which
//!   version of every asset it held at that moment.
//! - [`AssetItem`]: A single rule artifact with content, lifecycle state,
//!   categories and effective/expiry dates.
//! - [`FunctionItem`]: A shared function, attached to packages by reference.
//!
//! All three implement [`VersionedRecord`]. A handle either follows the live
//! working copy (the *head*) or wraps one frozen historical version.
//!
//! ## Registries
//!
//! - [`StateItem`]: Named lifecycle tag, unique by name.
//! - [`CategoryItem`]: Hierarchical classification tree rooted at `/`.
//!
//! Items never own each other. Asset state, asset categories and a package's
//! functions are stored as names, paths or ids and resolved against their
//! registry when asked for.

mod asset;
mod category;
mod function;
mod package;
mod state;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{NodeRecord, NodeStore, NodeType, PropertyValue, VersionRecord};

pub use asset::*;
pub use category::*;
pub use function::*;
pub use package::*;
pub use state::*;

/// Property names shared by the item types.
pub(crate) mod keys {
    pub const CONTENT: &str = "content";
    pub const DESCRIPTION: &str = "description";
    pub const FORMAT: &str = "format";
    pub const STATE: &str = "state";
    pub const CATEGORIES: &str = "categories";
    pub const DATE_EFFECTIVE: &str = "date_effective";
    pub const DATE_EXPIRED: &str = "date_expired";
    pub const PACKAGE_NAME: &str = "package_name";
    pub const FUNCTIONS: &str = "functions";
    pub const CHECKIN_COMMENT: &str = "checkin_comment";
    pub const LAST_MODIFIED: &str = "last_modified";
}

/// Names of the folders under the store root.
pub(crate) mod registries {
    pub const PACKAGES: &str = "packages";
    pub const STATES: &str = "states";
    pub const CATEGORIES: &str = "categories";
    pub const FUNCTIONS: &str = "functions";
}

const INITIAL_COMMENT: &str = "Initial version";

/// Locate one of the top-level registry folders.
pub(crate) fn registry(store: &dyn NodeStore, name: &str) -> Result<NodeRecord> {
    let root = store.root()?;
    store
        .get_child(root.uuid, name)?
        .ok_or_else(|| Error::NotFound(format!("registry '{}' is not initialized", name)))
}

/// What a handle is looking at.
#[derive(Clone)]
enum View {
    /// The live working copy, loaded when the lineage head was `base`.
    Head { base: u64 },
    /// One immutable historical version.
    Frozen(Arc<VersionRecord>),
}

/// A typed reference to one node of the store, live or frozen.
///
/// Every versioned item is a thin wrapper around a handle.
#[derive(Clone)]
pub struct NodeHandle {
    store: Arc<dyn NodeStore>,
    uuid: Uuid,
    name: String,
    node_type: NodeType,
    view: View,
}

impl NodeHandle {
    /// Create a node and freeze it as version 1.
    pub(crate) fn create(
        store: Arc<dyn NodeStore>,
        parent: Uuid,
        name: &str,
        node_type: NodeType,
        properties: Vec<(&str, PropertyValue)>,
    ) -> Result<Self> {
        let record = store.create_node(parent, name, node_type)?;
        for (key, value) in properties {
            store.set_property(record.uuid, key, Some(value))?;
        }
        let mut handle = Self {
            store,
            uuid: record.uuid,
            name: record.name,
            node_type,
            view: View::Head { base: 0 },
        };
        handle.checkin(INITIAL_COMMENT)?;
        Ok(handle)
    }

    /// Wrap the live node, failing with `NotFound` if it has another type.
    pub(crate) fn head(
        store: Arc<dyn NodeStore>,
        record: NodeRecord,
        expected: NodeType,
    ) -> Result<Self> {
        if record.node_type != expected {
            return Err(wrong_type(record.uuid, record.node_type, expected));
        }
        let base = store.head_version(record.uuid)?.unwrap_or(0);
        Ok(Self {
            store,
            uuid: record.uuid,
            name: record.name,
            node_type: record.node_type,
            view: View::Head { base },
        })
    }

    pub(crate) fn load(store: Arc<dyn NodeStore>, uuid: Uuid, expected: NodeType) -> Result<Self> {
        let record = store.get_node(uuid)?;
        Self::head(store, record, expected)
    }

    pub(crate) fn frozen(
        store: Arc<dyn NodeStore>,
        version: VersionRecord,
        expected: NodeType,
    ) -> Result<Self> {
        if version.node_type != expected {
            return Err(wrong_type(version.node, version.node_type, expected));
        }
        Ok(Self {
            store,
            uuid: version.node,
            name: version.name.clone(),
            node_type: version.node_type,
            view: View::Frozen(Arc::new(version)),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub(crate) fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// The frozen version this handle wraps, if it is historical.
    pub fn frozen_version(&self) -> Option<&VersionRecord> {
        match &self.view {
            View::Frozen(version) => Some(version),
            View::Head { .. } => None,
        }
    }

    pub fn is_historical(&self) -> bool {
        matches!(self.view, View::Frozen(_))
    }

    /// The lineage head for head handles, the frozen number otherwise.
    pub fn version_number(&self) -> u64 {
        match &self.view {
            View::Head { base } => self.current_version().unwrap_or(*base),
            View::Frozen(version) => version.number,
        }
    }

    fn current_version(&self) -> Result<u64> {
        match &self.view {
            View::Head { .. } => Ok(self.store.head_version(self.uuid)?.unwrap_or(0)),
            View::Frozen(version) => Ok(version.number),
        }
    }

    pub(crate) fn property(&self, key: &str) -> Result<Option<PropertyValue>> {
        match &self.view {
            View::Head { .. } => self.store.get_property(self.uuid, key),
            View::Frozen(version) => Ok(version.properties.get(key).cloned()),
        }
    }

    pub(crate) fn string_property(&self, key: &str) -> Result<String> {
        Ok(self
            .property(key)?
            .and_then(|v| v.as_string().map(str::to_string))
            .unwrap_or_default())
    }

    pub(crate) fn optional_string_property(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .property(key)?
            .and_then(|v| v.as_string().map(str::to_string)))
    }

    pub(crate) fn date_property(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.property(key)?.and_then(|v| v.as_date()))
    }

    pub(crate) fn set_property(&self, key: &str, value: Option<PropertyValue>) -> Result<()> {
        self.ensure_current()?;
        self.store.set_property(self.uuid, key, value)
    }

    pub(crate) fn ensure_head(&self) -> Result<()> {
        match &self.view {
            View::Head { .. } => Ok(()),
            View::Frozen(version) => Err(Error::ReadOnly(format!(
                "version {} of {} '{}' cannot be modified",
                version.number,
                self.node_type.as_str(),
                self.name
            ))),
        }
    }

    /// Fails unless this is a head handle loaded at the current lineage head.
    pub(crate) fn ensure_current(&self) -> Result<()> {
        let base = match &self.view {
            View::Head { base } => *base,
            View::Frozen(_) => return self.ensure_head(),
        };
        let head = self.current_version()?;
        if head != base {
            return Err(Error::ConcurrentModification(format!(
                "{} '{}' is at version {} but this handle was loaded at version {}",
                self.node_type.as_str(),
                self.name,
                head,
                base
            )));
        }
        Ok(())
    }

    /// Freeze the working copy as the next version.
    ///
    /// Fails if another handle advanced the lineage after this one was loaded.
    pub(crate) fn checkin(&mut self, comment: &str) -> Result<()> {
        self.ensure_current()?;
        let head = self.current_version()?;

        self.store.set_property(
            self.uuid,
            keys::CHECKIN_COMMENT,
            Some(PropertyValue::String(comment.to_string())),
        )?;
        self.store.set_property(
            self.uuid,
            keys::LAST_MODIFIED,
            Some(PropertyValue::Date(Utc::now())),
        )?;

        let version = self
            .store
            .checkpoint_version(self.uuid, &(head + 1).to_string())?;
        tracing::debug!(
            "Checked in {} '{}' as version {}",
            self.node_type.as_str(),
            self.name,
            version.number
        );
        self.view = View::Head {
            base: version.number,
        };
        Ok(())
    }

    pub(crate) fn preceding(&self) -> Result<Option<Self>> {
        let current = self.current_version()?;
        if current <= 1 {
            return Ok(None);
        }
        self.at_version(current - 1).map(Some)
    }

    pub(crate) fn at_version(&self, number: u64) -> Result<Self> {
        let version = self.store.get_version(self.uuid, number)?;
        Self::frozen(self.store.clone(), version, self.node_type)
    }

    pub(crate) fn history(&self) -> Result<Vec<Self>> {
        self.store
            .list_versions(self.uuid)?
            .into_iter()
            .map(|v| Self::frozen(self.store.clone(), v, self.node_type))
            .collect()
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("node_type", &self.node_type)
            .field("version", &self.version_number())
            .field("historical", &self.is_historical())
            .finish()
    }
}

fn wrong_type(uuid: Uuid, actual: NodeType, expected: NodeType) -> Error {
    Error::NotFound(format!(
        "node {} is a {}, not a {}",
        uuid,
        actual.as_str(),
        expected.as_str()
    ))
}

/// Identity, version metadata and history walking shared by every versioned item.
pub trait VersionedRecord: Sized {
    fn handle(&self) -> &NodeHandle;
    fn handle_mut(&mut self) -> &mut NodeHandle;
    fn from_handle(handle: NodeHandle) -> Self;

    fn uuid(&self) -> Uuid {
        self.handle().uuid()
    }

    fn name(&self) -> &str {
        self.handle().name()
    }

    /// Version this handle represents. For head handles, the current head of
    /// the lineage, even if this handle has gone stale.
    fn version_number(&self) -> u64 {
        self.handle().version_number()
    }

    fn is_historical(&self) -> bool {
        self.handle().is_historical()
    }

    fn checkin_comment(&self) -> Result<String> {
        self.handle().string_property(keys::CHECKIN_COMMENT)
    }

    fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        self.handle().date_property(keys::LAST_MODIFIED)
    }

    fn checkin(&mut self, comment: &str) -> Result<()> {
        self.handle_mut().checkin(comment)
    }

    /// The version immediately before this one in the same lineage.
    fn preceding_version(&self) -> Result<Option<Self>> {
        Ok(self.handle().preceding()?.map(Self::from_handle))
    }

    /// A frozen handle on one version of this lineage.
    fn load_version(&self, number: u64) -> Result<Self> {
        Ok(Self::from_handle(self.handle().at_version(number)?))
    }

    /// Every version of this lineage, oldest first.
    fn version_history(&self) -> Result<Vec<Self>> {
        Ok(self
            .handle()
            .history()?
            .into_iter()
            .map(Self::from_handle)
            .collect())
    }
}

/// Lazy sequence of items, produced fresh by every call that returns one.
pub struct Items<T> {
    inner: Box<dyn Iterator<Item = Result<T>>>,
}

impl<T> Items<T> {
    pub(crate) fn new(iter: impl Iterator<Item = Result<T>> + 'static) -> Self {
        Self {
            inner: Box::new(iter),
        }
    }
}

impl<T> Iterator for Items<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
