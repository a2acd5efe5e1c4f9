use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::schema;
use super::{
    FrozenChild, NodeRecord, NodeStore, NodeType, Properties, PropertyValue, VersionRecord,
};
use crate::error::{validate_name, Error, Result};

/// Node store backed by a single SQLite connection.
///
/// One store is one session: the connection always has a transaction open,
/// `save` commits it and `discard` rolls it back. Writers in other sessions
/// on the same file see nothing until `save`, and a session whose snapshot is
/// older than a commit it would overwrite fails with a concurrency error
/// instead of waiting.
///
/// The transaction is `DEFERRED`, so it takes its read snapshot at the first
/// read after `save`/`discard` and holds it until the next one. In WAL mode
/// the checkpointer cannot move past an open snapshot, so the `-wal` file keeps
/// growing while a session reads without saving. Long-running sessions should
/// call `save` or `discard` at quiet points.
pub struct SqliteNodeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNodeStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Self::open_with_journal_mode(path, "WAL")
    }

    pub fn open_with_journal_mode(path: PathBuf, journal_mode: &str) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Store("Database path has no parent directory".to_string()))?;
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", journal_mode)?;
        tracing::debug!("Opened node store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::ZERO)?;
        schema::run_migrations(&conn)?;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }
}

impl Clone for SqliteNodeStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl NodeStore for SqliteNodeStore {
    fn root(&self) -> Result<NodeRecord> {
        let conn = self.lock();
        if let Some(root) = conn
            .query_row(
                "SELECT uuid, parent_uuid, name, node_type, created_at
                 FROM nodes WHERE parent_uuid IS NULL",
                [],
                row_to_node,
            )
            .optional()?
        {
            return Ok(root);
        }

        let root = NodeRecord {
            uuid: Uuid::new_v4(),
            parent: None,
            name: String::new(),
            node_type: NodeType::Folder,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO nodes (uuid, parent_uuid, name, node_type, created_at)
             VALUES (?, NULL, ?, ?, ?)",
            (
                root.uuid.to_string(),
                &root.name,
                root.node_type.as_str(),
                root.created_at.to_rfc3339(),
            ),
        )?;
        Ok(root)
    }

    fn create_node(&self, parent: Uuid, name: &str, node_type: NodeType) -> Result<NodeRecord> {
        validate_name(name)?;
        let conn = self.lock();
        let parent_node = load_node(&conn, parent)?;
        if load_child(&conn, parent, name)?.is_some() {
            return Err(Error::DuplicateName(format!(
                "'{}' already exists under '{}'",
                name, parent_node.name
            )));
        }

        let node = NodeRecord {
            uuid: Uuid::new_v4(),
            parent: Some(parent),
            name: name.to_string(),
            node_type,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO nodes (uuid, parent_uuid, name, node_type, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                node.uuid.to_string(),
                parent.to_string(),
                &node.name,
                node_type.as_str(),
                node.created_at.to_rfc3339(),
            ),
        )?;
        Ok(node)
    }

    fn get_node(&self, uuid: Uuid) -> Result<NodeRecord> {
        let conn = self.lock();
        load_node(&conn, uuid)
    }

    fn get_child(&self, parent: Uuid, name: &str) -> Result<Option<NodeRecord>> {
        let conn = self.lock();
        load_child(&conn, parent, name)
    }

    fn children(&self, parent: Uuid) -> Result<Vec<NodeRecord>> {
        let conn = self.lock();
        load_children(&conn, parent)
    }

    fn remove_node(&self, uuid: Uuid) -> Result<()> {
        let conn = self.lock();
        let node = load_node(&conn, uuid)?;
        if node.parent.is_none() {
            return Err(Error::Store("The root node cannot be removed".to_string()));
        }

        let subtree = "WITH RECURSIVE subtree(uuid) AS (
                SELECT ?1
                UNION ALL
                SELECT n.uuid FROM nodes n JOIN subtree s ON n.parent_uuid = s.uuid
            )";
        conn.execute(
            &format!(
                "{} DELETE FROM properties WHERE node_uuid IN (SELECT uuid FROM subtree)",
                subtree
            ),
            [uuid.to_string()],
        )?;
        conn.execute(
            &format!(
                "{} DELETE FROM nodes WHERE uuid IN (SELECT uuid FROM subtree)",
                subtree
            ),
            [uuid.to_string()],
        )?;
        Ok(())
    }

    fn move_node(&self, uuid: Uuid, new_parent: Uuid) -> Result<()> {
        let conn = self.lock();
        let node = load_node(&conn, uuid)?;
        let target = load_node(&conn, new_parent)?;

        // The target must not sit inside the subtree being moved.
        let mut cursor = Some(target.uuid);
        while let Some(current) = cursor {
            if current == uuid {
                return Err(Error::Store(format!(
                    "Cannot move '{}' underneath itself",
                    node.name
                )));
            }
            cursor = load_node(&conn, current)?.parent;
        }

        if let Some(existing) = load_child(&conn, new_parent, &node.name)? {
            if existing.uuid != uuid {
                return Err(Error::DuplicateName(format!(
                    "'{}' already exists under '{}'",
                    node.name, target.name
                )));
            }
            return Ok(());
        }

        conn.execute(
            "UPDATE nodes SET parent_uuid = ? WHERE uuid = ?",
            (new_parent.to_string(), uuid.to_string()),
        )?;
        Ok(())
    }

    fn get_property(&self, node: Uuid, key: &str) -> Result<Option<PropertyValue>> {
        let conn = self.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM properties WHERE node_uuid = ? AND key = ?",
                (node.to_string(), key),
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn properties(&self, node: Uuid) -> Result<Properties> {
        let conn = self.lock();
        load_properties(&conn, node)
    }

    fn set_property(&self, node: Uuid, key: &str, value: Option<PropertyValue>) -> Result<()> {
        let conn = self.lock();
        load_node(&conn, node)?;
        match value {
            Some(value) => {
                conn.execute(
                    "INSERT OR REPLACE INTO properties (node_uuid, key, value) VALUES (?, ?, ?)",
                    (node.to_string(), key, serde_json::to_string(&value)?),
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM properties WHERE node_uuid = ? AND key = ?",
                    (node.to_string(), key),
                )?;
            }
        }
        Ok(())
    }

    fn checkpoint_version(&self, node: Uuid, label: &str) -> Result<VersionRecord> {
        let conn = self.lock();
        let record = load_node(&conn, node)?;
        let properties = load_properties(&conn, node)?;

        let mut children = Vec::new();
        for child in load_children(&conn, node)? {
            children.push(FrozenChild {
                version: load_head_version(&conn, child.uuid)?,
                uuid: child.uuid,
                name: child.name,
                node_type: child.node_type,
            });
        }

        let mut pins = std::collections::BTreeMap::new();
        for value in properties.values() {
            for referenced in value.as_references().unwrap_or_default() {
                if let Some(version) = load_head_version(&conn, *referenced)? {
                    pins.insert(*referenced, version);
                }
            }
        }

        let exists: i32 = conn.query_row(
            "SELECT COUNT(*) FROM versions WHERE node_uuid = ? AND label = ?",
            (node.to_string(), label),
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(Error::DuplicateName(format!(
                "version label '{}' already used by '{}'",
                label, record.name
            )));
        }

        let number = load_head_version(&conn, node)?.unwrap_or(0) + 1;
        let version = VersionRecord {
            uuid: Uuid::new_v4(),
            node,
            number,
            label: label.to_string(),
            name: record.name,
            node_type: record.node_type,
            properties,
            children,
            pins,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO versions (uuid, node_uuid, number, label, name, node_type,
                                   properties, children, pins, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                version.uuid.to_string(),
                node.to_string(),
                number as i64,
                &version.label,
                &version.name,
                version.node_type.as_str(),
                serde_json::to_string(&version.properties)?,
                serde_json::to_string(&version.children)?,
                serde_json::to_string(&version.pins)?,
                version.created_at.to_rfc3339(),
            ),
        )?;

        Ok(version)
    }

    fn list_versions(&self, node: Uuid) -> Result<Vec<VersionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE node_uuid = ? ORDER BY number",
            VERSION_SELECT
        ))?;
        let raw = stmt
            .query_map([node.to_string()], row_to_raw_version)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawVersion::decode).collect()
    }

    fn get_version(&self, node: Uuid, number: u64) -> Result<VersionRecord> {
        let conn = self.lock();
        conn.query_row(
            &format!("{} WHERE node_uuid = ? AND number = ?", VERSION_SELECT),
            (node.to_string(), number as i64),
            row_to_raw_version,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("version {} of node {}", number, node)))?
        .decode()
    }

    fn get_version_by_label(&self, node: Uuid, label: &str) -> Result<VersionRecord> {
        let conn = self.lock();
        conn.query_row(
            &format!("{} WHERE node_uuid = ? AND label = ?", VERSION_SELECT),
            (node.to_string(), label),
            row_to_raw_version,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("version '{}' of node {}", label, node)))?
        .decode()
    }

    fn head_version(&self, node: Uuid) -> Result<Option<u64>> {
        let conn = self.lock();
        load_head_version(&conn, node)
    }

    fn save(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("COMMIT")?;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch("ROLLBACK")?;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(())
    }
}

const NODE_SELECT: &str = "SELECT uuid, parent_uuid, name, node_type, created_at FROM nodes";

const VERSION_SELECT: &str =
    "SELECT uuid, node_uuid, number, label, name, node_type, properties, children, pins, created_at
     FROM versions";

fn load_node(conn: &Connection, uuid: Uuid) -> Result<NodeRecord> {
    conn.query_row(
        &format!("{} WHERE uuid = ?", NODE_SELECT),
        [uuid.to_string()],
        row_to_node,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("node {}", uuid)))
}

fn load_child(conn: &Connection, parent: Uuid, name: &str) -> Result<Option<NodeRecord>> {
    Ok(conn
        .query_row(
            &format!("{} WHERE parent_uuid = ? AND name = ?", NODE_SELECT),
            (parent.to_string(), name),
            row_to_node,
        )
        .optional()?)
}

fn load_children(conn: &Connection, parent: Uuid) -> Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE parent_uuid = ? ORDER BY name",
        NODE_SELECT
    ))?;
    let children = stmt
        .query_map([parent.to_string()], row_to_node)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(children)
}

fn load_properties(conn: &Connection, node: Uuid) -> Result<Properties> {
    let mut stmt = conn.prepare("SELECT key, value FROM properties WHERE node_uuid = ?")?;
    let rows = stmt
        .query_map([node.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut properties = Properties::new();
    for (key, json) in rows {
        properties.insert(key, serde_json::from_str(&json)?);
    }
    Ok(properties)
}

fn load_head_version(conn: &Connection, node: Uuid) -> Result<Option<u64>> {
    let head: Option<i64> = conn.query_row(
        "SELECT MAX(number) FROM versions WHERE node_uuid = ?",
        [node.to_string()],
        |row| row.get(0),
    )?;
    Ok(head.map(|n| n as u64))
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<NodeRecord> {
    Ok(NodeRecord {
        uuid: parse_uuid(row.get::<_, String>(0)?),
        parent: row.get::<_, Option<String>>(1)?.map(parse_uuid),
        name: row.get(2)?,
        node_type: NodeType::from_str(&row.get::<_, String>(3)?).unwrap_or(NodeType::Folder),
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

/// Version row before its JSON columns are decoded.
struct RawVersion {
    uuid: String,
    node: String,
    number: i64,
    label: String,
    name: String,
    node_type: String,
    properties: String,
    children: String,
    pins: String,
    created_at: String,
}

impl RawVersion {
    fn decode(self) -> Result<VersionRecord> {
        Ok(VersionRecord {
            uuid: parse_uuid(self.uuid),
            node: parse_uuid(self.node),
            number: self.number as u64,
            label: self.label,
            name: self.name,
            node_type: NodeType::from_str(&self.node_type).unwrap_or(NodeType::Folder),
            properties: serde_json::from_str(&self.properties)?,
            children: serde_json::from_str(&self.children)?,
            pins: serde_json::from_str(&self.pins)?,
            created_at: parse_datetime(self.created_at),
        })
    }
}

fn row_to_raw_version(row: &Row<'_>) -> rusqlite::Result<RawVersion> {
    Ok(RawVersion {
        uuid: row.get(0)?,
        node: row.get(1)?,
        number: row.get(2)?,
        label: row.get(3)?,
        name: row.get(4)?,
        node_type: row.get(5)?,
        properties: row.get(6)?,
        children: row.get(7)?,
        pins: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_folder() -> (SqliteNodeStore, NodeRecord) {
        let store = SqliteNodeStore::open_memory().unwrap();
        let root = store.root().unwrap();
        let folder = store.create_node(root.uuid, "things", NodeType::Folder).unwrap();
        (store, folder)
    }

    #[test]
    fn test_root_is_stable() {
        let store = SqliteNodeStore::open_memory().unwrap();
        let a = store.root().unwrap();
        let b = store.root().unwrap();
        assert_eq!(a.uuid, b.uuid);
        assert!(a.parent.is_none());
    }

    #[test]
    fn test_duplicate_child_name_is_rejected() {
        let (store, folder) = store_with_folder();
        store.create_node(folder.uuid, "x", NodeType::Asset).unwrap();
        let err = store.create_node(folder.uuid, "x", NodeType::Package).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
    }

    #[test]
    fn test_children_are_ordered_by_name() {
        let (store, folder) = store_with_folder();
        store.create_node(folder.uuid, "zeta", NodeType::Asset).unwrap();
        store.create_node(folder.uuid, "alpha", NodeType::Asset).unwrap();

        let names: Vec<_> = store
            .children(folder.uuid)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_property_set_and_remove() {
        let (store, folder) = store_with_folder();
        let node = store.create_node(folder.uuid, "n", NodeType::Asset).unwrap();

        store
            .set_property(node.uuid, "content", Some(PropertyValue::String("abc".into())))
            .unwrap();
        assert_eq!(
            store.get_property(node.uuid, "content").unwrap(),
            Some(PropertyValue::String("abc".into()))
        );

        store.set_property(node.uuid, "content", None).unwrap();
        assert_eq!(store.get_property(node.uuid, "content").unwrap(), None);
    }

    #[test]
    fn test_checkpoint_numbers_increase_and_freeze_state() {
        let (store, folder) = store_with_folder();
        let node = store.create_node(folder.uuid, "n", NodeType::Asset).unwrap();
        assert_eq!(store.head_version(node.uuid).unwrap(), None);

        store
            .set_property(node.uuid, "content", Some(PropertyValue::String("one".into())))
            .unwrap();
        let v1 = store.checkpoint_version(node.uuid, "1").unwrap();
        store
            .set_property(node.uuid, "content", Some(PropertyValue::String("two".into())))
            .unwrap();
        let v2 = store.checkpoint_version(node.uuid, "2").unwrap();

        assert_eq!(v1.number, 1);
        assert_eq!(v2.number, 2);
        assert_eq!(store.head_version(node.uuid).unwrap(), Some(2));

        let frozen = store.get_version_by_label(node.uuid, "1").unwrap();
        assert_eq!(
            frozen.properties.get("content"),
            Some(&PropertyValue::String("one".into()))
        );
        let all = store.list_versions(node.uuid).unwrap();
        assert_eq!(all.iter().map(|v| v.number).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_checkpoint_label_must_be_unique() {
        let (store, folder) = store_with_folder();
        let node = store.create_node(folder.uuid, "n", NodeType::Asset).unwrap();
        store.checkpoint_version(node.uuid, "a").unwrap();
        assert!(matches!(
            store.checkpoint_version(node.uuid, "a"),
            Err(Error::DuplicateName(_))
        ));
    }

    #[test]
    fn test_checkpoint_pins_children_and_references() {
        let (store, folder) = store_with_folder();
        let parent = store.create_node(folder.uuid, "p", NodeType::Package).unwrap();
        let child = store.create_node(parent.uuid, "c", NodeType::Asset).unwrap();
        let other = store.create_node(folder.uuid, "f", NodeType::Function).unwrap();
        store.checkpoint_version(child.uuid, "1").unwrap();
        store.checkpoint_version(child.uuid, "2").unwrap();
        store.checkpoint_version(other.uuid, "1").unwrap();
        store
            .set_property(
                parent.uuid,
                "functions",
                Some(PropertyValue::References(vec![other.uuid])),
            )
            .unwrap();

        let snapshot = store.checkpoint_version(parent.uuid, "1").unwrap();
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].uuid, child.uuid);
        assert_eq!(snapshot.children[0].version, Some(2));
        assert_eq!(snapshot.pins.get(&other.uuid), Some(&1));

        let reloaded = store.get_version(parent.uuid, 1).unwrap();
        assert_eq!(reloaded, snapshot);
    }

    #[test]
    fn test_remove_keeps_version_history() {
        let (store, folder) = store_with_folder();
        let node = store.create_node(folder.uuid, "n", NodeType::Asset).unwrap();
        store.checkpoint_version(node.uuid, "1").unwrap();

        store.remove_node(node.uuid).unwrap();
        assert!(matches!(store.get_node(node.uuid), Err(Error::NotFound(_))));
        assert_eq!(store.list_versions(node.uuid).unwrap().len(), 1);
    }

    #[test]
    fn test_move_reparents_and_rejects_cycles() {
        let (store, folder) = store_with_folder();
        let a = store.create_node(folder.uuid, "a", NodeType::Package).unwrap();
        let b = store.create_node(folder.uuid, "b", NodeType::Package).unwrap();
        let item = store.create_node(a.uuid, "item", NodeType::Asset).unwrap();

        store.move_node(item.uuid, b.uuid).unwrap();
        assert_eq!(store.get_node(item.uuid).unwrap().parent, Some(b.uuid));
        assert!(store.children(a.uuid).unwrap().is_empty());

        assert!(matches!(
            store.move_node(folder.uuid, b.uuid),
            Err(Error::Store(_))
        ));
    }

    #[test]
    fn test_discard_drops_pending_mutations() {
        let (store, folder) = store_with_folder();
        store.save().unwrap();
        store.create_node(folder.uuid, "pending", NodeType::Asset).unwrap();
        store.discard().unwrap();
        assert!(store.get_child(folder.uuid, "pending").unwrap().is_none());
    }
}
