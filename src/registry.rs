//! Application registration collaborator.
//!
//! Records installed applications in a program list so they can be found
//! for upgrade and uninstall. [`RedbRegistry`] keeps the list in a redb
//! database; [`MemoryRegistry`] is used for dry runs.

use crate::error::{Error, Result};
use crate::site::StepResult;
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Program list database file name inside the data directory.
pub const PROGRAMS_DB: &str = "programs.redb";

/// Product code -> JSON encoded [`AppRecord`].
const PROGRAMS: TableDefinition<&str, &[u8]> = TableDefinition::new("programs");

/// An entry in the program list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    /// Stable product identifier.
    pub product_code: String,
    /// Name shown in the program list.
    pub display_name: String,
    /// Installed version.
    pub version: String,
    /// Directory the application was installed to.
    pub install_path: PathBuf,
    /// Command line that removes the application.
    pub uninstall_command: String,
}

/// Program list registration.
pub trait AppRegistration {
    /// Add or replace a program entry.
    fn register(&self, record: &AppRecord) -> StepResult;
    /// Remove a program entry.
    fn unregister(&self, product_code: &str) -> StepResult;
    /// Look up a program entry.
    fn lookup(&self, product_code: &str) -> Option<AppRecord>;
    /// All program entries, ordered by product code.
    fn list(&self) -> Vec<AppRecord>;
}

fn db_err(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}

/// Program list stored in a redb database.
pub struct RedbRegistry {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRegistry").field("path", &self.path).finish()
    }
}

impl RedbRegistry {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Open or create `programs.redb` inside `data_dir`.
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join(PROGRAMS_DB))
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn put(&self, record: &AppRecord) -> Result<()> {
        let value = serde_json::to_vec(record).map_err(db_err)?;
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(PROGRAMS).map_err(db_err)?;
            table
                .insert(record.product_code.as_str(), value.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn delete(&self, product_code: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = txn.open_table(PROGRAMS).map_err(db_err)?;
            let removed = table.remove(product_code).map_err(db_err)?;
            removed.is_some()
        };
        txn.commit().map_err(db_err)?;
        Ok(removed)
    }

    /// Read one record.
    pub fn get(&self, product_code: &str) -> Result<Option<AppRecord>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = match txn.open_table(PROGRAMS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(db_err(e)),
        };
        match table.get(product_code).map_err(db_err)? {
            Some(value) => serde_json::from_slice(value.value())
                .map(Some)
                .map_err(db_err),
            None => Ok(None),
        }
    }

    /// Read every record.
    pub fn all(&self) -> Result<Vec<AppRecord>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = match txn.open_table(PROGRAMS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(db_err(e)),
        };
        let mut records = Vec::new();
        for item in table.iter().map_err(db_err)? {
            let (key, value) = item.map_err(db_err)?;
            match serde_json::from_slice::<AppRecord>(value.value()) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(product_code = key.value(), error = %e, "skipping unreadable program entry");
                }
            }
        }
        Ok(records)
    }
}

impl AppRegistration for RedbRegistry {
    fn register(&self, record: &AppRecord) -> StepResult {
        match self.put(record) {
            Ok(()) => StepResult::ok(),
            Err(e) => StepResult::failed(e.to_string()),
        }
    }

    fn unregister(&self, product_code: &str) -> StepResult {
        match self.delete(product_code) {
            Ok(true) => StepResult::ok(),
            Ok(false) => StepResult::failed(format!("'{}' is not registered", product_code)),
            Err(e) => StepResult::failed(e.to_string()),
        }
    }

    fn lookup(&self, product_code: &str) -> Option<AppRecord> {
        match self.get(product_code) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(product_code, error = %e, "program list lookup failed");
                None
            }
        }
    }

    fn list(&self) -> Vec<AppRecord> {
        self.all().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read program list");
            Vec::new()
        })
    }
}

/// In-process program list.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: Mutex<BTreeMap<String, AppRecord>>,
}

impl MemoryRegistry {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppRegistration for MemoryRegistry {
    fn register(&self, record: &AppRecord) -> StepResult {
        self.records
            .lock()
            .insert(record.product_code.clone(), record.clone());
        StepResult::ok()
    }

    fn unregister(&self, product_code: &str) -> StepResult {
        match self.records.lock().remove(product_code) {
            Some(_) => StepResult::ok(),
            None => StepResult::failed(format!("'{}' is not registered", product_code)),
        }
    }

    fn lookup(&self, product_code: &str) -> Option<AppRecord> {
        self.records.lock().get(product_code).cloned()
    }

    fn list(&self) -> Vec<AppRecord> {
        self.records.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str) -> AppRecord {
        AppRecord {
            product_code: code.to_string(),
            display_name: format!("{} app", code),
            version: "1.0.0".to_string(),
            install_path: PathBuf::from("/srv").join(code),
            uninstall_command: format!("/usr/local/bin/uninstall /uninstall {}", code),
        }
    }

    #[test]
    fn test_redb_register_lookup_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RedbRegistry::open_in(dir.path()).unwrap();

        assert!(registry.lookup("shop").is_none());
        assert!(registry.list().is_empty());

        assert!(registry.register(&record("shop")).success);
        assert!(registry.register(&record("blog")).success);
        assert_eq!(registry.lookup("shop"), Some(record("shop")));

        let codes: Vec<_> = registry.list().into_iter().map(|r| r.product_code).collect();
        assert_eq!(codes, vec!["blog", "shop"]);

        assert!(registry.unregister("shop").success);
        assert!(registry.lookup("shop").is_none());
        assert!(!registry.unregister("shop").success);
    }

    #[test]
    fn test_redb_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = RedbRegistry::open_in(dir.path()).unwrap();
            let mut updated = record("shop");
            assert!(registry.register(&updated).success);
            updated.version = "2.0.0".to_string();
            assert!(registry.register(&updated).success);
        }
        let registry = RedbRegistry::open_in(dir.path()).unwrap();
        assert_eq!(registry.lookup("shop").unwrap().version, "2.0.0");
        assert_eq!(registry.path(), dir.path().join(PROGRAMS_DB));
    }

    #[test]
    fn test_memory_registry() {
        let registry = MemoryRegistry::new();
        assert!(registry.register(&record("shop")).success);
        assert_eq!(registry.list().len(), 1);
        assert!(registry.unregister("shop").success);
        assert!(!registry.unregister("shop").success);
    }
}
