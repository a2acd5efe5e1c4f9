use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{keys, registries, registry};
use crate::error::{Error, Result};
use crate::store::{NodeRecord, NodeStore, NodeType, PropertyValue};

/// A node in the classification tree.
///
/// The tree is rooted at `/`; [`CategoryItem::full_path`] joins the names of
/// all ancestors below the root with `/` (the root's own path is empty).
/// Equality is by underlying node.
#[derive(Clone)]
pub struct CategoryItem {
    store: Arc<dyn NodeStore>,
    uuid: Uuid,
    name: String,
    full_path: String,
}

impl CategoryItem {
    pub(crate) fn root(store: Arc<dyn NodeStore>) -> Result<Self> {
        let record = registry(store.as_ref(), registries::CATEGORIES)?;
        Ok(Self {
            store,
            uuid: record.uuid,
            name: "/".to_string(),
            full_path: String::new(),
        })
    }

    /// Resolve a slash separated path relative to the root. `/` and `` are the root.
    pub(crate) fn load(store: Arc<dyn NodeStore>, path: &str) -> Result<Self> {
        let mut current = Self::root(store)?;
        for segment in segments(path) {
            current = current.child(segment)?.ok_or_else(|| {
                Error::NotFound(format!("category '{}'", normalize(path)))
            })?;
        }
        Ok(current)
    }

    /// Like [`CategoryItem::load`], creating missing segments along the way.
    pub(crate) fn get_or_create(store: Arc<dyn NodeStore>, path: &str) -> Result<Self> {
        let mut current = Self::root(store)?;
        for segment in segments(path) {
            current = match current.child(segment)? {
                Some(child) => child,
                None => current.add_category(segment, "")?,
            };
        }
        Ok(current)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn is_root(&self) -> bool {
        self.full_path.is_empty()
    }

    pub fn description(&self) -> Result<String> {
        Ok(self
            .store
            .get_property(self.uuid, keys::DESCRIPTION)?
            .and_then(|v| v.as_string().map(str::to_string))
            .unwrap_or_default())
    }

    pub fn update_description(&self, description: &str) -> Result<()> {
        self.store.set_property(
            self.uuid,
            keys::DESCRIPTION,
            Some(PropertyValue::String(description.to_string())),
        )
    }

    /// Add a child category. Fails with `DuplicateName` if it already exists.
    pub fn add_category(&self, name: &str, description: &str) -> Result<CategoryItem> {
        let record = self.store.create_node(self.uuid, name, NodeType::Category)?;
        let child = self.wrap_child(record);
        child.update_description(description)?;
        tracing::debug!("Created category '{}'", child.full_path);
        Ok(child)
    }

    pub fn children(&self) -> Result<Vec<CategoryItem>> {
        Ok(self
            .store
            .children(self.uuid)?
            .into_iter()
            .filter(|record| record.node_type == NodeType::Category)
            .map(|record| self.wrap_child(record))
            .collect())
    }

    pub fn parent(&self) -> Result<Option<CategoryItem>> {
        if self.is_root() {
            return Ok(None);
        }
        let parent_path = match self.full_path.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => "",
        };
        Self::load(self.store.clone(), parent_path).map(Some)
    }

    fn child(&self, name: &str) -> Result<Option<CategoryItem>> {
        Ok(self
            .store
            .get_child(self.uuid, name)?
            .filter(|record| record.node_type == NodeType::Category)
            .map(|record| self.wrap_child(record)))
    }

    fn wrap_child(&self, record: NodeRecord) -> CategoryItem {
        let full_path = if self.is_root() {
            record.name.clone()
        } else {
            format!("{}/{}", self.full_path, record.name)
        };
        CategoryItem {
            store: self.store.clone(),
            uuid: record.uuid,
            name: record.name,
            full_path,
        }
    }
}

/// Canonical form of a category path: no leading, trailing or doubled slashes.
pub(crate) fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl PartialEq for CategoryItem {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for CategoryItem {}

impl fmt::Debug for CategoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CategoryItem")
            .field("uuid", &self.uuid)
            .field("full_path", &self.full_path)
            .finish()
    }
}

impl fmt::Display for CategoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.full_path)
        }
    }
}
