//! 基于 JSON 文件的命名空间设置存储与书库句柄。
//!
//! 书库根目录下的 `metadata_db_prefs_backup.json` 保存所有设置，命名空间键写作
//! `namespaced:<namespace>:<key>`；书库 id 在首次打开时生成并持久化。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::third_party::host::{LibraryDb, SettingsStore, StoreError};

pub const PREFS_BACKUP_FILE: &str = "metadata_db_prefs_backup.json";
const LIBRARY_ID_KEY: &str = "library_id";

fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("namespaced:{namespace}:{key}")
}

#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonSettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            if raw.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&raw).map_err(|source| {
                    StoreError::Parse {
                        path: path.clone(),
                        source,
                    }
                })? {
                    Value::Object(map) => map,
                    _ => return Err(StoreError::NotAnObject(path)),
                }
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    /// 先落盘再更新内存；写盘失败时内存中的值保持不变。
    pub fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut g = match self.values.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = g.clone();
        next.insert(key.to_string(), value);
        self.persist(&next)?;
        *g = next;
        Ok(())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(values).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &bytes).map_err(io_err)?;
        debug!(target: "prefs", path = %self.path.display(), "设置已保存");
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get_namespaced(&self, namespace: &str, key: &str) -> Option<Value> {
        self.get(&namespaced_key(namespace, key))
    }

    fn set_namespaced(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.set(&namespaced_key(namespace, key), value)
    }
}

/// 以目录表示的书库：设置存储 + 持久化的书库 id。
#[derive(Debug)]
pub struct FileLibrary {
    root: PathBuf,
    library_id: String,
    store: JsonSettingsStore,
}

impl FileLibrary {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        let store = JsonSettingsStore::open(root.join(PREFS_BACKUP_FILE))?;

        let library_id = match store.get(LIBRARY_ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                store.set(LIBRARY_ID_KEY, Value::String(id.clone()))?;
                info!(target: "prefs", library = %root.display(), library_id = %id, "new library id");
                id
            }
        };

        Ok(Self {
            root,
            library_id,
            store,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &JsonSettingsStore {
        &self.store
    }
}

impl LibraryDb for FileLibrary {
    fn library_id(&self) -> String {
        self.library_id.clone()
    }

    fn prefs(&self) -> &dyn SettingsStore {
        &self.store
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!(
        "{}part",
        path.extension().and_then(|s| s.to_str()).unwrap_or("")
    ));
    fs::write(&tmp, bytes)?;
    // best-effort replace
    let _ = fs::remove_file(path);
    fs::rename(tmp, path)?;
    Ok(())
}
