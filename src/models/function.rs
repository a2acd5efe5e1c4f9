use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{keys, NodeHandle, VersionedRecord};
use crate::error::Result;
use crate::store::{NodeStore, NodeType, PropertyValue};

pub const FUNCTION_FORMAT: &str = "function";

/// A versioned function shared between packages.
///
/// Packages attach functions by reference, so an edit made through any handle
/// is visible through every package that attached it. Only a package baseline
/// pins the function version it saw.
#[derive(Debug, Clone)]
pub struct FunctionItem {
    handle: NodeHandle,
}

impl FunctionItem {
    pub(crate) fn create(
        store: Arc<dyn NodeStore>,
        registry: Uuid,
        name: &str,
        content: &str,
        description: &str,
    ) -> Result<Self> {
        let handle = NodeHandle::create(
            store,
            registry,
            name,
            NodeType::Function,
            vec![
                (keys::CONTENT, PropertyValue::String(content.to_string())),
                (keys::DESCRIPTION, PropertyValue::String(description.to_string())),
            ],
        )?;
        Ok(Self { handle })
    }

    /// Wrap the live node with this UUID. Fails with `NotFound` for other node types.
    pub fn from_node(store: Arc<dyn NodeStore>, uuid: Uuid) -> Result<Self> {
        Ok(Self {
            handle: NodeHandle::load(store, uuid, NodeType::Function)?,
        })
    }

    pub fn content(&self) -> Result<String> {
        self.handle.string_property(keys::CONTENT)
    }

    pub fn description(&self) -> Result<String> {
        self.handle.string_property(keys::DESCRIPTION)
    }

    pub fn format(&self) -> &'static str {
        FUNCTION_FORMAT
    }

    pub fn update_content(&self, content: &str) -> Result<()> {
        self.handle.set_property(
            keys::CONTENT,
            Some(PropertyValue::String(content.to_string())),
        )
    }

    pub fn update_description(&self, description: &str) -> Result<()> {
        self.handle.set_property(
            keys::DESCRIPTION,
            Some(PropertyValue::String(description.to_string())),
        )
    }
}

impl VersionedRecord for FunctionItem {
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

impl fmt::Display for FunctionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function '{}' (version {})",
            self.handle.name(),
            self.handle.version_number()
        )
    }
}
