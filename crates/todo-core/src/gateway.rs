//! Versioned object-store database persisted as a single JSON document.
//!
//! A [`Database`] holds named object stores. Each store keeps its records keyed
//! by an integer read from the record's key path, optionally generated by an
//! auto-increment key generator, and may declare secondary indexes. All record
//! access goes through a [`Transaction`], which works on a staged copy of the
//! stores it was opened for. A read-write transaction only becomes durable once
//! [`Transaction::commit`] returns; dropping it without committing discards the
//! staged changes.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Primary key of a record.
pub type Key = u64;

/// Schema migration hook run by [`StorageClient`] when it opens its database.
pub type UpgradeFn = fn(&mut VersionChange<'_>) -> Result<(), StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database document is not valid: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("cannot open version {requested}: database is already at version {stored}")]
    VersionDowngrade { requested: u32, stored: u32 },

    #[error("database version must be at least 1, got {0}")]
    InvalidVersion(u32),

    #[error("database file holds {found:?}, expected {expected:?}")]
    NameMismatch { expected: String, found: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("object store {0:?} is not writable in a read-only transaction")]
    ReadOnly(String),

    #[error("data error: {0}")]
    DataError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreParams {
    pub key_path: String,
    pub auto_increment: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParams {
    pub unique: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseFile {
    name: String,
    version: u32,
    #[serde(default)]
    stores: BTreeMap<String, StoreData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    key_path: String,
    auto_increment: bool,
    #[serde(default = "first_key")]
    next_key: Key,
    #[serde(default)]
    indexes: BTreeMap<String, IndexSchema>,
    #[serde(default)]
    records: BTreeMap<Key, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexSchema {
    key_path: String,
    unique: bool,
}

fn first_key() -> Key {
    1
}

#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    file: DatabaseFile,
}

impl Database {
    /// Open the database at `path`, creating it when missing.
    ///
    /// `upgrade` runs exactly once when the file does not exist yet or when
    /// `version` is higher than the stored version. The new schema and version
    /// are only persisted if it succeeds.
    #[instrument(skip(path, upgrade), fields(path = %path.display()))]
    pub fn open<F>(path: &Path, name: &str, version: u32, upgrade: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&mut VersionChange<'_>) -> Result<(), StoreError>,
    {
        if version == 0 {
            return Err(StoreError::InvalidVersion(version));
        }

        let file = if path.exists() {
            let doc = read_document(path)?;
            if doc.name != name {
                return Err(StoreError::NameMismatch {
                    expected: name.to_string(),
                    found: doc.name,
                });
            }
            if doc.version > version {
                return Err(StoreError::VersionDowngrade {
                    requested: version,
                    stored: doc.version,
                });
            }
            doc
        } else {
            debug!("database file missing, starting from an empty document");
            DatabaseFile {
                name: name.to_string(),
                version: 0,
                stores: BTreeMap::new(),
            }
        };

        let mut db = Self {
            path: path.to_path_buf(),
            file,
        };

        let old_version = db.file.version;
        if old_version < version {
            info!(old_version, new_version = version, "upgrading database schema");
            let mut staged = db.file.stores.clone();
            let mut change = VersionChange {
                old_version,
                new_version: version,
                stores: &mut staged,
            };
            upgrade(&mut change)?;

            let upgraded = DatabaseFile {
                name: db.file.name.clone(),
                version,
                stores: staged,
            };
            write_document(&db.path, &upgraded)?;
            db.file = upgraded;
        }

        info!(name, version = db.file.version, stores = db.file.stores.len(), "opened database");
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn version(&self) -> u32 {
        self.file.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.file.stores.keys().cloned().collect()
    }

    /// Begin a transaction over the named stores.
    pub fn transaction(&mut self, scope: &[&str], mode: TxMode) -> Result<Transaction<'_>, StoreError> {
        let mut staged = BTreeMap::new();
        for name in scope {
            let store = self
                .file
                .stores
                .get(*name)
                .ok_or_else(|| StoreError::NotFound(format!("object store {name:?}")))?;
            staged.insert((*name).to_string(), store.clone());
        }

        debug!(?scope, ?mode, "transaction started");
        Ok(Transaction {
            db: self,
            mode,
            staged,
            done: false,
        })
    }

    pub fn close(self) {
        debug!(path = %self.path.display(), "database closed");
    }
}

/// Schema editing handle passed to the upgrade callback of [`Database::open`].
#[derive(Debug)]
pub struct VersionChange<'a> {
    old_version: u32,
    new_version: u32,
    stores: &'a mut BTreeMap<String, StoreData>,
}

impl VersionChange<'_> {
    /// `0` when the database is being created.
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub fn has_object_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn create_object_store(&mut self, name: &str, params: StoreParams) -> Result<StoreSchemaMut<'_>, StoreError> {
        if self.stores.contains_key(name) {
            return Err(StoreError::Constraint(format!("object store {name:?} already exists")));
        }
        if params.key_path.is_empty() {
            return Err(StoreError::DataError(format!("object store {name:?} needs a key path")));
        }

        info!(store = name, key_path = %params.key_path, auto_increment = params.auto_increment, "creating object store");
        let data = self.stores.entry(name.to_string()).or_insert(StoreData {
            key_path: params.key_path,
            auto_increment: params.auto_increment,
            next_key: first_key(),
            indexes: BTreeMap::new(),
            records: BTreeMap::new(),
        });
        Ok(StoreSchemaMut {
            name: name.to_string(),
            data,
        })
    }

    pub fn object_store_mut(&mut self, name: &str) -> Result<StoreSchemaMut<'_>, StoreError> {
        let data = self
            .stores
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("object store {name:?}")))?;
        Ok(StoreSchemaMut {
            name: name.to_string(),
            data,
        })
    }

    pub fn delete_object_store(&mut self, name: &str) -> Result<(), StoreError> {
        self.stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("object store {name:?}")))
    }
}

#[derive(Debug)]
pub struct StoreSchemaMut<'a> {
    name: String,
    data: &'a mut StoreData,
}

impl StoreSchemaMut<'_> {
    pub fn has_index(&self, name: &str) -> bool {
        self.data.indexes.contains_key(name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.data.indexes.keys().cloned().collect()
    }

    pub fn create_index(&mut self, name: &str, key_path: &str, params: IndexParams) -> Result<(), StoreError> {
        if self.data.indexes.contains_key(name) {
            return Err(StoreError::Constraint(format!(
                "index {name:?} already exists on {:?}",
                self.name
            )));
        }

        if params.unique {
            let mut seen: Vec<&Value> = Vec::new();
            for record in self.data.records.values() {
                if let Some(value) = record.get(key_path) {
                    if seen.contains(&value) {
                        return Err(StoreError::Constraint(format!(
                            "existing records violate unique index {name:?}"
                        )));
                    }
                    seen.push(value);
                }
            }
        }

        debug!(store = %self.name, index = name, key_path, unique = params.unique, "creating index");
        self.data.indexes.insert(
            name.to_string(),
            IndexSchema {
                key_path: key_path.to_string(),
                unique: params.unique,
            },
        );
        Ok(())
    }

    pub fn delete_index(&mut self, name: &str) -> Result<(), StoreError> {
        self.data
            .indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("index {name:?} on {:?}", self.name)))
    }
}

/// A scoped unit of work over one or more object stores.
#[derive(Debug)]
pub struct Transaction<'db> {
    db: &'db mut Database,
    mode: TxMode,
    staged: BTreeMap<String, StoreData>,
    done: bool,
}

impl Transaction<'_> {
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn object_store(&mut self, name: &str) -> Result<ObjectStore<'_>, StoreError> {
        let data = self
            .staged
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("object store {name:?} is not in this transaction's scope")))?;
        Ok(ObjectStore {
            name: name.to_string(),
            mode: self.mode,
            data,
        })
    }

    /// Apply the staged changes and persist them. Returns once the database
    /// file has been replaced.
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.done = true;
        if self.mode == TxMode::ReadOnly {
            return Ok(());
        }

        let staged = std::mem::take(&mut self.staged);
        let mut next = self.db.file.clone();
        for (name, data) in staged {
            next.stores.insert(name, data);
        }

        write_document(&self.db.path, &next)?;
        self.db.file = next;
        debug!("transaction committed");
        Ok(())
    }

    pub fn abort(mut self) {
        self.done = true;
        debug!(mode = ?self.mode, "transaction aborted");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done && self.mode == TxMode::ReadWrite {
            warn!("read-write transaction dropped without commit; staged changes discarded");
        }
    }
}

/// Record access for one store inside a transaction.
#[derive(Debug)]
pub struct ObjectStore<'t> {
    name: String,
    mode: TxMode,
    data: &'t mut StoreData,
}

impl ObjectStore<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_path(&self) -> &str {
        &self.data.key_path
    }

    pub fn auto_increment(&self) -> bool {
        self.data.auto_increment
    }

    pub fn index_names(&self) -> Vec<String> {
        self.data.indexes.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.data.records.len()
    }

    pub fn get(&self, key: Key) -> Option<Value> {
        self.data.records.get(&key).cloned()
    }

    /// Every record, in ascending key order.
    pub fn get_all(&self) -> Vec<Value> {
        self.data.records.values().cloned().collect()
    }

    /// Insert a new record. Fails if a record with the same key exists.
    pub fn add(&mut self, value: Value) -> Result<Key, StoreError> {
        self.ensure_writable()?;
        let (key, value, generated) = self.resolve_key(value)?;
        if self.data.records.contains_key(&key) {
            return Err(StoreError::Constraint(format!(
                "key {key} already exists in {:?}",
                self.name
            )));
        }
        self.check_unique_indexes(key, &value)?;
        self.advance_key_generator(key, generated);
        self.data.records.insert(key, value);
        debug!(store = %self.name, key, "record added");
        Ok(key)
    }

    /// Insert or replace a record.
    pub fn put(&mut self, value: Value) -> Result<Key, StoreError> {
        self.ensure_writable()?;
        let (key, value, generated) = self.resolve_key(value)?;
        self.check_unique_indexes(key, &value)?;
        self.advance_key_generator(key, generated);
        self.data.records.insert(key, value);
        debug!(store = %self.name, key, "record put");
        Ok(key)
    }

    /// Remove a record. Removing a key that is not present succeeds.
    pub fn delete(&mut self, key: Key) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let existed = self.data.records.remove(&key).is_some();
        debug!(store = %self.name, key, existed, "record deleted");
        Ok(())
    }

    pub fn index(&self, name: &str) -> Result<Index<'_>, StoreError> {
        let schema = self
            .data
            .indexes
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("index {name:?} on {:?}", self.name)))?;
        Ok(Index {
            schema,
            records: &self.data.records,
        })
    }

    pub fn get_typed<T: DeserializeOwned>(&self, key: Key) -> Result<Option<T>, StoreError> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    pub fn get_all_typed<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        self.data
            .records
            .values()
            .map(|value| serde_json::from_value(value.clone()).map_err(StoreError::from))
            .collect()
    }

    pub fn add_typed<T: Serialize>(&mut self, record: &T) -> Result<Key, StoreError> {
        let value = serde_json::to_value(record)?;
        self.add(value)
    }

    pub fn put_typed<T: Serialize>(&mut self, record: &T) -> Result<Key, StoreError> {
        let value = serde_json::to_value(record)?;
        self.put(value)
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(StoreError::ReadOnly(self.name.clone())),
        }
    }

    /// Returns the record key, the record (with a generated key injected when
    /// needed) and whether the key came from the generator.
    fn resolve_key(&self, value: Value) -> Result<(Key, Value, bool), StoreError> {
        let Value::Object(mut map) = value else {
            return Err(StoreError::DataError(format!(
                "records in {:?} must be JSON objects",
                self.name
            )));
        };

        let key_path = self.data.key_path.as_str();
        match map.get(key_path) {
            Some(Value::Null) | None => {
                if !self.data.auto_increment {
                    return Err(StoreError::DataError(format!(
                        "record has no key at {key_path:?} and {:?} has no key generator",
                        self.name
                    )));
                }
                let key = self.data.next_key;
                map.insert(key_path.to_string(), Value::from(key));
                Ok((key, Value::Object(map), true))
            }
            Some(raw) => {
                let key = raw.as_u64().ok_or_else(|| {
                    StoreError::DataError(format!("key at {key_path:?} must be a non-negative integer, got {raw}"))
                })?;
                Ok((key, Value::Object(map), false))
            }
        }
    }

    fn advance_key_generator(&mut self, key: Key, generated: bool) {
        if !self.data.auto_increment {
            return;
        }
        if generated || key >= self.data.next_key {
            self.data.next_key = key.saturating_add(1);
        }
    }

    fn check_unique_indexes(&self, key: Key, value: &Value) -> Result<(), StoreError> {
        for (index_name, schema) in &self.data.indexes {
            if !schema.unique {
                continue;
            }
            let Some(indexed) = value.get(&schema.key_path) else {
                continue;
            };
            let clash = self
                .data
                .records
                .iter()
                .any(|(other_key, other)| *other_key != key && other.get(&schema.key_path) == Some(indexed));
            if clash {
                return Err(StoreError::Constraint(format!(
                    "unique index {index_name:?} already holds {indexed}"
                )));
            }
        }
        Ok(())
    }
}

/// Secondary lookup over one key path of a store.
#[derive(Debug)]
pub struct Index<'s> {
    schema: &'s IndexSchema,
    records: &'s BTreeMap<Key, Value>,
}

impl Index<'_> {
    pub fn key_path(&self) -> &str {
        &self.schema.key_path
    }

    pub fn unique(&self) -> bool {
        self.schema.unique
    }

    /// Records whose indexed value equals `query`, in primary key order.
    /// Records without a value at the index key path are not indexed.
    pub fn get_all(&self, query: &Value) -> Vec<Value> {
        self.matching(query).map(|(_, record)| record.clone()).collect()
    }

    pub fn get_all_keys(&self, query: &Value) -> Vec<Key> {
        self.matching(query).map(|(key, _)| *key).collect()
    }

    pub fn count(&self, query: &Value) -> usize {
        self.matching(query).count()
    }

    fn matching<'q>(&'q self, query: &'q Value) -> impl Iterator<Item = (&'q Key, &'q Value)> + 'q {
        let key_path = self.schema.key_path.as_str();
        self.records
            .iter()
            .filter(move |(_, record)| record.get(key_path) == Some(query))
    }
}

/// Owned, lazily opened handle to one database file.
///
/// The database is opened (and upgraded if needed) on the first call to
/// [`StorageClient::database`] and released by [`StorageClient::close`]. A
/// closed client reopens on its next use.
#[derive(Debug)]
pub struct StorageClient {
    path: PathBuf,
    name: String,
    version: u32,
    upgrade: UpgradeFn,
    db: Option<Database>,
}

impl StorageClient {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, version: u32, upgrade: UpgradeFn) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            version,
            upgrade,
            db: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    pub fn database(&mut self) -> Result<&mut Database, StoreError> {
        let db = match self.db.take() {
            Some(db) => db,
            None => Database::open(&self.path, &self.name, self.version, self.upgrade)?,
        };
        Ok(self.db.insert(db))
    }

    pub fn close(&mut self) {
        if let Some(db) = self.db.take() {
            db.close();
        }
    }
}

#[instrument]
fn read_document(path: &Path) -> Result<DatabaseFile, StoreError> {
    let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: DatabaseFile = serde_json::from_str(&raw)?;
    debug!(name = %doc.name, version = doc.version, "loaded database document");
    Ok(doc)
}

#[instrument(skip(doc))]
fn write_document(path: &Path, doc: &DatabaseFile) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    serde_json::to_writer_pretty(&mut temp, doc)?;
    temp.flush().map_err(io_err)?;
    temp.persist(path).map_err(|err| io_err(err.error))?;

    debug!(file = %path.display(), "database document written");
    Ok(())
}
