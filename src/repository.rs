//! The repository session: package, state, category and function registries
//! over one node store.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::models::{
    registries, AssetItem, CategoryItem, FunctionItem, Items, PackageItem, StateItem,
    VersionedRecord,
};
use crate::store::{NodeRecord, NodeStore, NodeType, SqliteNodeStore};

/// Package that every repository starts with.
pub const DEFAULT_PACKAGE: &str = "default";

/// Root aggregate of the rules repository.
///
/// One `RulesRepository` is one session against its store: every item it hands
/// out shares that session, and nothing is durable until [`RulesRepository::save`].
#[derive(Clone)]
pub struct RulesRepository {
    store: Arc<dyn NodeStore>,
    packages: Uuid,
    functions: Uuid,
    default_package: String,
}

impl RulesRepository {
    /// Open a session on `store`, creating the registries and the default
    /// package on first use. Initialization is saved immediately.
    pub fn new(store: Arc<dyn NodeStore>) -> Result<Self> {
        Self::with_default_package(store, DEFAULT_PACKAGE)
    }

    pub fn with_default_package(store: Arc<dyn NodeStore>, default_package: &str) -> Result<Self> {
        let root = store.root()?;
        let packages =
            ensure_folder(store.as_ref(), &root, registries::PACKAGES, NodeType::Folder)?;
        let functions =
            ensure_folder(store.as_ref(), &root, registries::FUNCTIONS, NodeType::Folder)?;
        ensure_folder(store.as_ref(), &root, registries::STATES, NodeType::Folder)?;
        ensure_folder(store.as_ref(), &root, registries::CATEGORIES, NodeType::Category)?;

        let repo = Self {
            store,
            packages: packages.uuid,
            functions: functions.uuid,
            default_package: default_package.to_string(),
        };

        if repo.store.get_child(repo.packages, default_package)?.is_none() {
            tracing::info!("Creating default package '{}'", default_package);
            repo.create_rule_package(default_package, "The default rule package")?;
        }
        repo.save()?;
        Ok(repo)
    }

    /// Open the SQLite-backed repository described by `config`.
    pub fn open(config: &RepositoryConfig) -> Result<Self> {
        let path = config.resolved_database_path()?;
        let store = SqliteNodeStore::open_with_journal_mode(path, &config.journal_mode)?;
        Self::with_default_package(Arc::new(store), &config.default_package)
    }

    /// A throwaway repository in an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::new(Arc::new(SqliteNodeStore::open_memory()?))
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    // ============================================================
    // Packages
    // ============================================================

    /// Create an empty package at version 1. Fails with `DuplicateName` if a
    /// package of this name exists.
    pub fn create_rule_package(&self, name: &str, description: &str) -> Result<PackageItem> {
        if self.store.get_child(self.packages, name)?.is_some() {
            return Err(Error::DuplicateName(format!(
                "package '{}' already exists",
                name
            )));
        }
        let package = PackageItem::create(self.store.clone(), self.packages, name, description)?;
        tracing::info!("Created package '{}'", name);
        Ok(package)
    }

    pub fn load_rule_package(&self, name: &str) -> Result<PackageItem> {
        PackageItem::load_by_name(self.store.clone(), name)
    }

    pub fn load_rule_package_by_uuid(&self, uuid: Uuid) -> Result<PackageItem> {
        PackageItem::from_node(self.store.clone(), uuid)
    }

    pub fn load_default_rule_package(&self) -> Result<PackageItem> {
        self.load_rule_package(&self.default_package)
    }

    /// All head packages. Each call starts a fresh sequence.
    pub fn list_packages(&self) -> Result<Items<PackageItem>> {
        let store = self.store.clone();
        let records = self.store.children(self.packages)?;
        Ok(Items::new(
            records
                .into_iter()
                .filter(|record| record.node_type == NodeType::Package)
                .map(move |record| PackageItem::from_record(store.clone(), record)),
        ))
    }

    // ============================================================
    // Assets
    // ============================================================

    /// Head asset with this UUID. Fails with `NotFound` if the node is missing
    /// or is not an asset.
    pub fn load_rule_by_uuid(&self, uuid: Uuid) -> Result<AssetItem> {
        AssetItem::from_node(self.store.clone(), uuid)
    }

    /// Move an asset to another package.
    ///
    /// The move is checked in with `comment`; the version before it keeps the
    /// old package name and comment.
    pub fn move_rule_item_package(
        &self,
        destination: &str,
        asset_uuid: Uuid,
        comment: &str,
    ) -> Result<AssetItem> {
        let mut asset = self.load_rule_by_uuid(asset_uuid)?;
        let target = self.load_rule_package(destination)?;
        let source = asset.package_name()?;

        if let Some(existing) = self.store.get_child(target.uuid(), asset.name())? {
            if existing.uuid != asset_uuid {
                return Err(Error::DuplicateName(format!(
                    "asset '{}' already exists in package '{}'",
                    asset.name(),
                    destination
                )));
            }
        }

        self.store.move_node(asset_uuid, target.uuid())?;
        asset.set_package_name(destination)?;
        asset.checkin(comment)?;

        tracing::info!(
            "Moved asset '{}' from package '{}' to '{}'",
            asset.name(),
            source,
            destination
        );
        Ok(asset)
    }

    /// Head assets of every package tagged with this category.
    pub fn find_assets_by_category(&self, path: &str) -> Result<Vec<AssetItem>> {
        let category = self.load_category(path)?;
        let mut found = Vec::new();
        for package in self.list_packages()? {
            for asset in package?.rules()? {
                let asset = asset?;
                if asset
                    .category_paths()?
                    .iter()
                    .any(|p| p == category.full_path())
                {
                    found.push(asset);
                }
            }
        }
        Ok(found)
    }

    // ============================================================
    // Functions
    // ============================================================

    /// Create a function that is not yet attached to any package.
    pub fn add_function(&self, name: &str, content: &str) -> Result<FunctionItem> {
        self.add_function_with_description(name, content, "")
    }

    pub fn add_function_with_description(
        &self,
        name: &str,
        content: &str,
        description: &str,
    ) -> Result<FunctionItem> {
        if self.store.get_child(self.functions, name)?.is_some() {
            return Err(Error::DuplicateName(format!(
                "function '{}' already exists",
                name
            )));
        }
        FunctionItem::create(self.store.clone(), self.functions, name, content, description)
    }

    pub fn load_function(&self, name: &str) -> Result<FunctionItem> {
        let record = self
            .store
            .get_child(self.functions, name)?
            .ok_or_else(|| Error::NotFound(format!("function '{}'", name)))?;
        FunctionItem::from_node(self.store.clone(), record.uuid)
    }

    pub fn load_function_by_uuid(&self, uuid: Uuid) -> Result<FunctionItem> {
        FunctionItem::from_node(self.store.clone(), uuid)
    }

    // ============================================================
    // States and categories
    // ============================================================

    /// The state with this name, created if it does not exist yet.
    pub fn get_state(&self, name: &str) -> Result<StateItem> {
        StateItem::get_or_create(self.store.as_ref(), name)
    }

    pub fn list_states(&self) -> Result<Vec<StateItem>> {
        let folder = crate::models::registry(self.store.as_ref(), registries::STATES)?;
        self.store
            .children(folder.uuid)?
            .into_iter()
            .map(StateItem::from_record)
            .collect()
    }

    /// Category at `path` relative to the root; `/` is the root itself.
    pub fn load_category(&self, path: &str) -> Result<CategoryItem> {
        CategoryItem::load(self.store.clone(), path)
    }

    /// Category at `path`, creating every missing segment.
    pub fn get_or_create_category(&self, path: &str) -> Result<CategoryItem> {
        CategoryItem::get_or_create(self.store.clone(), path)
    }

    // ============================================================
    // Session
    // ============================================================

    /// Commit every pending mutation of this session.
    pub fn save(&self) -> Result<()> {
        self.store.save()?;
        tracing::debug!("Saved repository session");
        Ok(())
    }

    /// Drop every pending mutation of this session.
    pub fn discard(&self) -> Result<()> {
        self.store.discard()?;
        tracing::debug!("Discarded pending changes");
        Ok(())
    }
}

fn ensure_folder(
    store: &dyn NodeStore,
    root: &NodeRecord,
    name: &str,
    node_type: NodeType,
) -> Result<NodeRecord> {
    match store.get_child(root.uuid, name)? {
        Some(record) => Ok(record),
        None => store.create_node(root.uuid, name, node_type),
    }
}
