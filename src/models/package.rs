use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{
    keys, registries, registry, AssetItem, FunctionItem, Items, NodeHandle, StateItem,
    VersionedRecord,
};
use crate::error::{Error, Result};
use crate::store::{NodeRecord, NodeStore, NodeType, PropertyValue, VersionRecord};

/// Fixed format tag of every package.
pub const PACKAGE_FORMAT: &str = "Rule Package";

/// A versioned container of rule assets and attached functions.
///
/// The head package always lists the live working copy of each attached asset.
/// [`PackageItem::create_baseline`] checks the package itself in; the frozen
/// package version then resolves its assets and functions to the versions that
/// were head at that moment, no matter how the assets move on afterwards.
#[derive(Debug, Clone)]
pub struct PackageItem {
    handle: NodeHandle,
}

impl PackageItem {
    pub(crate) fn create(
        store: Arc<dyn NodeStore>,
        registry: Uuid,
        name: &str,
        description: &str,
    ) -> Result<Self> {
        let handle = NodeHandle::create(
            store,
            registry,
            name,
            NodeType::Package,
            vec![(keys::DESCRIPTION, PropertyValue::String(description.to_string()))],
        )?;
        Ok(Self { handle })
    }

    /// Wrap the live node with this UUID. Fails with `NotFound` for other node types.
    pub fn from_node(store: Arc<dyn NodeStore>, uuid: Uuid) -> Result<Self> {
        Ok(Self {
            handle: NodeHandle::load(store, uuid, NodeType::Package)?,
        })
    }

    pub(crate) fn from_record(store: Arc<dyn NodeStore>, record: NodeRecord) -> Result<Self> {
        Ok(Self {
            handle: NodeHandle::head(store, record, NodeType::Package)?,
        })
    }

    pub(crate) fn load_by_name(store: Arc<dyn NodeStore>, name: &str) -> Result<Self> {
        let folder = registry(store.as_ref(), registries::PACKAGES)?;
        let record = store
            .get_child(folder.uuid, name)?
            .ok_or_else(|| Error::NotFound(format!("package '{}'", name)))?;
        Self::from_record(store, record)
    }

    pub fn description(&self) -> Result<String> {
        self.handle.string_property(keys::DESCRIPTION)
    }

    pub fn update_description(&self, description: &str) -> Result<()> {
        self.handle.set_property(
            keys::DESCRIPTION,
            Some(PropertyValue::String(description.to_string())),
        )
    }

    pub fn format(&self) -> &'static str {
        PACKAGE_FORMAT
    }

    /// State the most recent baseline was created with.
    pub fn state_name(&self) -> Result<Option<String>> {
        self.handle.optional_string_property(keys::STATE)
    }

    pub fn state(&self) -> Result<Option<StateItem>> {
        match self.state_name()? {
            Some(name) => StateItem::lookup(self.handle.store().as_ref(), &name),
            None => Ok(None),
        }
    }

    /// Create an asset and attach it to this package.
    pub fn add_asset(&self, name: &str, description: &str) -> Result<AssetItem> {
        self.handle.ensure_current()?;
        let store = self.handle.store().clone();
        if store.get_child(self.uuid(), name)?.is_some() {
            return Err(Error::DuplicateName(format!(
                "asset '{}' already exists in package '{}'",
                name,
                self.name()
            )));
        }
        let asset = AssetItem::create(store, self.uuid(), self.name(), name, description)?;
        tracing::debug!("Added asset '{}' to package '{}'", name, self.name());
        Ok(asset)
    }

    /// Assets of this package.
    ///
    /// On the head package these are the live working copies of all attached
    /// assets; on a frozen package, the asset versions pinned by that baseline.
    pub fn rules(&self) -> Result<Items<AssetItem>> {
        let store = self.handle.store().clone();
        match self.handle.frozen_version() {
            None => {
                let children = store.children(self.uuid())?;
                Ok(Items::new(
                    children
                        .into_iter()
                        .filter(|child| child.node_type == NodeType::Asset)
                        .map(move |record| {
                            NodeHandle::head(store.clone(), record, NodeType::Asset)
                                .map(AssetItem::from_handle)
                        }),
                ))
            }
            Some(version) => {
                let children = version.children.clone();
                Ok(Items::new(
                    children
                        .into_iter()
                        .filter(|child| child.node_type == NodeType::Asset)
                        .filter_map(move |child| {
                            let number = child.version?;
                            Some(frozen_asset(&store, child.uuid, number))
                        }),
                ))
            }
        }
    }

    /// Assets filtered by lifecycle state.
    ///
    /// For every asset this package has ever held (at head or in any of its
    /// versions) yields the newest checked-in version that was tagged with
    /// `state` while belonging to this package; assets without such a version
    /// are skipped. `None` is not "assets without a state": it returns the same
    /// as [`PackageItem::rules`].
    pub fn rules_with_state(&self, state: Option<&StateItem>) -> Result<Items<AssetItem>> {
        let Some(state) = state else {
            return self.rules();
        };
        let store = self.handle.store().clone();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut consider = |uuid: Uuid| {
            if seen.insert(uuid) {
                candidates.push(uuid);
            }
        };

        match self.handle.frozen_version() {
            None => store
                .children(self.uuid())?
                .into_iter()
                .filter(|child| child.node_type == NodeType::Asset)
                .for_each(|child| consider(child.uuid)),
            Some(version) => asset_children(version).for_each(&mut consider),
        }
        for version in store.list_versions(self.uuid())? {
            asset_children(&version).for_each(&mut consider);
        }

        let package_name = self.name().to_string();
        let state_name = state.name().to_string();
        Ok(Items::new(candidates.into_iter().filter_map(move |uuid| {
            let versions = match store.list_versions(uuid) {
                Ok(versions) => versions,
                Err(e) => return Some(Err(e)),
            };
            let matching = versions.into_iter().rev().find(|version| {
                let tagged = version.properties.get(keys::STATE).and_then(|v| v.as_string());
                let owner = version
                    .properties
                    .get(keys::PACKAGE_NAME)
                    .and_then(|v| v.as_string());
                tagged == Some(state_name.as_str()) && owner == Some(package_name.as_str())
            })?;
            Some(
                NodeHandle::frozen(store.clone(), matching, NodeType::Asset)
                    .map(AssetItem::from_handle),
            )
        })))
    }

    /// The asset with this name. Fails with `NotFound` if it is not attached.
    pub fn load_rule(&self, name: &str) -> Result<AssetItem> {
        let store = self.handle.store().clone();
        let not_found = || {
            Error::NotFound(format!(
                "asset '{}' in package '{}'",
                name,
                self.name()
            ))
        };
        match self.handle.frozen_version() {
            None => {
                let record = store
                    .get_child(self.uuid(), name)?
                    .filter(|record| record.node_type == NodeType::Asset)
                    .ok_or_else(not_found)?;
                Ok(AssetItem::from_handle(NodeHandle::head(
                    store,
                    record,
                    NodeType::Asset,
                )?))
            }
            Some(version) => {
                let child = version
                    .children
                    .iter()
                    .find(|child| child.node_type == NodeType::Asset && child.name == name)
                    .ok_or_else(not_found)?;
                let number = child.version.ok_or_else(not_found)?;
                frozen_asset(&store, child.uuid, number)
            }
        }
    }

    /// Detach an asset from the head package. Its version history is kept, so
    /// earlier baselines still resolve it.
    pub fn remove_rule(&self, name: &str) -> Result<()> {
        self.handle.ensure_current()?;
        let asset = self.load_rule(name)?;
        self.handle.store().remove_node(asset.uuid())?;
        tracing::info!("Removed asset '{}' from package '{}'", name, self.name());
        Ok(())
    }

    /// Attach a function. Fails with `DuplicateName` if a function of that name
    /// is already attached.
    pub fn add_function(&self, function: &FunctionItem) -> Result<()> {
        self.add_function_replacing(function, false)
    }

    /// Attach a function, replacing an attached function of the same name when
    /// `replace_if_exists` is set.
    pub fn add_function_replacing(
        &self,
        function: &FunctionItem,
        replace_if_exists: bool,
    ) -> Result<()> {
        self.handle.ensure_current()?;
        let store = self.handle.store();
        let mut refs = self.function_refs()?;

        let mut clash = None;
        for (index, attached) in refs.iter().enumerate() {
            let same_name = store.get_node(*attached)?.name == function.name();
            if *attached == function.uuid() || same_name {
                clash = Some(index);
                break;
            }
        }

        match clash {
            Some(_) if !replace_if_exists => {
                return Err(Error::DuplicateName(format!(
                    "function '{}' is already attached to package '{}'",
                    function.name(),
                    self.name()
                )));
            }
            Some(index) => refs[index] = function.uuid(),
            None => refs.push(function.uuid()),
        }

        self.handle
            .set_property(keys::FUNCTIONS, Some(PropertyValue::References(refs)))
    }

    /// Attached functions, materialized eagerly in attach order.
    pub fn functions(&self) -> Result<Vec<FunctionItem>> {
        let store = self.handle.store();
        let refs = self.function_refs()?;
        match self.handle.frozen_version() {
            None => refs
                .into_iter()
                .map(|uuid| FunctionItem::from_node(store.clone(), uuid))
                .collect(),
            Some(version) => refs
                .into_iter()
                .map(|uuid| match version.pins.get(&uuid) {
                    Some(number) => {
                        let frozen = store.get_version(uuid, *number)?;
                        Ok(FunctionItem::from_handle(NodeHandle::frozen(
                            store.clone(),
                            frozen,
                            NodeType::Function,
                        )?))
                    }
                    None => FunctionItem::from_node(store.clone(), uuid),
                })
                .collect(),
        }
    }

    pub fn remove_function(&self, function: &FunctionItem) -> Result<()> {
        self.handle.ensure_current()?;
        let mut refs = self.function_refs()?;
        let before = refs.len();
        refs.retain(|uuid| *uuid != function.uuid());
        if refs.len() == before {
            return Err(Error::NotFound(format!(
                "function '{}' is not attached to package '{}'",
                function.name(),
                self.name()
            )));
        }
        self.handle
            .set_property(keys::FUNCTIONS, Some(PropertyValue::References(refs)))
    }

    /// Freeze the package as a new version pinning the current head version of
    /// every attached asset and function.
    ///
    /// On failure the head package keeps the state it had before.
    pub fn create_baseline(&mut self, comment: &str, state: &StateItem) -> Result<()> {
        self.handle.ensure_current()?;
        let previous = self.handle.property(keys::STATE)?;
        self.handle.set_property(
            keys::STATE,
            Some(PropertyValue::String(state.name().to_string())),
        )?;
        if let Err(e) = self.checkin(comment) {
            self.handle.set_property(keys::STATE, previous)?;
            return Err(e);
        }
        tracing::info!(
            "Created baseline {} of package '{}' ({})",
            self.version_number(),
            self.name(),
            state.name()
        );
        Ok(())
    }

    fn function_refs(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .handle
            .property(keys::FUNCTIONS)?
            .and_then(|v| v.as_references().map(<[Uuid]>::to_vec))
            .unwrap_or_default())
    }
}

fn asset_children(version: &VersionRecord) -> impl Iterator<Item = Uuid> + '_ {
    version
        .children
        .iter()
        .filter(|child| child.node_type == NodeType::Asset)
        .map(|child| child.uuid)
}

fn frozen_asset(store: &Arc<dyn NodeStore>, uuid: Uuid, number: u64) -> Result<AssetItem> {
    let version = store.get_version(uuid, number)?;
    Ok(AssetItem::from_handle(NodeHandle::frozen(
        store.clone(),
        version,
        NodeType::Asset,
    )?))
}

impl VersionedRecord for PackageItem {
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

impl fmt::Display for PackageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "package '{}' (version {})",
            self.handle.name(),
            self.handle.version_number()
        )
    }
}
