//! Versioned repository for business-rule packages.
//!
//! Packages hold rule assets and reference shared functions. Assets are
//! versioned one by one, carry a lifecycle state that is independent of their
//! version history, and can move between packages. A package can be frozen
//! into a baseline that pins the version of every asset it holds.
//!
//! ```
//! use rules_repository::{RulesRepository, VersionedRecord};
//!
//! let repo = RulesRepository::open_memory()?;
//! let package = repo.create_rule_package("pricing", "price rules")?;
//! let mut rule = package.add_asset("discount", "volume discount")?;
//! rule.update_content("when qty > 10 then 5%")?;
//! rule.checkin("first cut")?;
//! repo.save()?;
//!
//! assert_eq!(rule.version_number(), 2);
//! # Ok::<(), rules_repository::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod render;
pub mod repository;
pub mod store;

pub use config::RepositoryConfig;
pub use error::{Error, Result};
pub use models::{
    AssetItem, CategoryItem, FunctionItem, Items, PackageItem, StateItem, VersionedRecord,
};
pub use repository::{RulesRepository, DEFAULT_PACKAGE};
pub use store::{NodeStore, SqliteNodeStore};
