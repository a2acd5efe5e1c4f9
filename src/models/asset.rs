use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::category::normalize;
use super::{keys, CategoryItem, NodeHandle, PackageItem, StateItem, VersionedRecord};
use crate::error::Result;
use crate::store::{NodeStore, NodeType, PropertyValue};

/// A single rule artifact inside a package.
///
/// `update_*` methods edit the live working copy, which every head handle in
/// the session sees immediately; nothing becomes history until
/// [`VersionedRecord::checkin`]. Each version remembers the package it was
/// checked in under, so moves between packages stay auditable.
#[derive(Debug, Clone)]
pub struct AssetItem {
    handle: NodeHandle,
}

impl AssetItem {
    pub(crate) fn create(
        store: Arc<dyn NodeStore>,
        package: Uuid,
        package_name: &str,
        name: &str,
        description: &str,
    ) -> Result<Self> {
        let handle = NodeHandle::create(
            store,
            package,
            name,
            NodeType::Asset,
            vec![
                (keys::CONTENT, PropertyValue::String(String::new())),
                (keys::DESCRIPTION, PropertyValue::String(description.to_string())),
                (keys::PACKAGE_NAME, PropertyValue::String(package_name.to_string())),
            ],
        )?;
        Ok(Self { handle })
    }

    /// Wrap the live node with this UUID. Fails with `NotFound` for other node types.
    pub fn from_node(store: Arc<dyn NodeStore>, uuid: Uuid) -> Result<Self> {
        Ok(Self {
            handle: NodeHandle::load(store, uuid, NodeType::Asset)?,
        })
    }

    pub fn content(&self) -> Result<String> {
        self.handle.string_property(keys::CONTENT)
    }

    pub fn description(&self) -> Result<String> {
        self.handle.string_property(keys::DESCRIPTION)
    }

    pub fn format(&self) -> Result<String> {
        self.handle.string_property(keys::FORMAT)
    }

    /// Name of the package this version belongs to.
    pub fn package_name(&self) -> Result<String> {
        self.handle.string_property(keys::PACKAGE_NAME)
    }

    /// The owning package, resolved by name at head.
    pub fn package(&self) -> Result<PackageItem> {
        PackageItem::load_by_name(self.handle.store().clone(), &self.package_name()?)
    }

    pub fn state_name(&self) -> Result<Option<String>> {
        self.handle.optional_string_property(keys::STATE)
    }

    pub fn state(&self) -> Result<Option<StateItem>> {
        match self.state_name()? {
            Some(name) => StateItem::lookup(self.handle.store().as_ref(), &name),
            None => Ok(None),
        }
    }

    pub fn date_effective(&self) -> Result<Option<DateTime<Utc>>> {
        self.handle.date_property(keys::DATE_EFFECTIVE)
    }

    pub fn date_expired(&self) -> Result<Option<DateTime<Utc>>> {
        self.handle.date_property(keys::DATE_EXPIRED)
    }

    pub fn category_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .handle
            .property(keys::CATEGORIES)?
            .and_then(|v| v.as_strings().map(<[String]>::to_vec))
            .unwrap_or_default())
    }

    pub fn categories(&self) -> Result<Vec<CategoryItem>> {
        self.category_paths()?
            .iter()
            .map(|path| CategoryItem::load(self.handle.store().clone(), path))
            .collect()
    }

    pub fn update_content(&self, content: &str) -> Result<()> {
        self.set_string(keys::CONTENT, content)
    }

    pub fn update_description(&self, description: &str) -> Result<()> {
        self.set_string(keys::DESCRIPTION, description)
    }

    pub fn update_format(&self, format: &str) -> Result<()> {
        self.set_string(keys::FORMAT, format)
    }

    /// Tag the working copy with a state, creating the state if needed.
    pub fn update_state(&self, name: &str) -> Result<StateItem> {
        self.handle.ensure_current()?;
        let state = StateItem::get_or_create(self.handle.store().as_ref(), name)?;
        self.set_string(keys::STATE, state.name())?;
        Ok(state)
    }

    pub fn update_date_effective(&self, date: DateTime<Utc>) -> Result<()> {
        self.handle
            .set_property(keys::DATE_EFFECTIVE, Some(PropertyValue::Date(date)))
    }

    pub fn update_date_expired(&self, date: DateTime<Utc>) -> Result<()> {
        self.handle
            .set_property(keys::DATE_EXPIRED, Some(PropertyValue::Date(date)))
    }

    /// Tag the working copy with an existing category.
    pub fn add_category(&self, path: &str) -> Result<()> {
        self.handle.ensure_current()?;
        let category = CategoryItem::load(self.handle.store().clone(), path)?;
        let mut paths = self.category_paths()?;
        if !paths.iter().any(|p| p == category.full_path()) {
            paths.push(category.full_path().to_string());
            self.handle
                .set_property(keys::CATEGORIES, Some(PropertyValue::Strings(paths)))?;
        }
        Ok(())
    }

    pub fn remove_category(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut paths = self.category_paths()?;
        paths.retain(|p| *p != path);
        self.handle
            .set_property(keys::CATEGORIES, Some(PropertyValue::Strings(paths)))
    }

    pub(crate) fn set_package_name(&self, package_name: &str) -> Result<()> {
        self.set_string(keys::PACKAGE_NAME, package_name)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.handle
            .set_property(key, Some(PropertyValue::String(value.to_string())))
    }
}

impl VersionedRecord for AssetItem {
    fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut NodeHandle {
        &mut self.handle
    }

    fn from_handle(handle: NodeHandle) -> Self {
        Self { handle }
    }
}

impl fmt::Display for AssetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "asset '{}' (version {}{})",
            self.handle.name(),
            self.handle.version_number(),
            if self.handle.is_historical() {
                ", frozen"
            } else {
                ""
            }
        )
    }
}
