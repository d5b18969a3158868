//! 宿主应用侧的契约：排版（polish）、命名空间设置存储、宿主版本。

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Host application version, compared lexicographically.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct HostVersion(pub u32, pub u32, pub u32);

impl HostVersion {
    /// 首个提供标点美化（smarten punctuation）的宿主版本。
    pub const SMARTEN_PUNCTUATION: HostVersion = HostVersion(0, 9, 39);
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Every switch of the host's polish pass. All off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolishOptions {
    pub subset_fonts: bool,
    pub embed_fonts: bool,
    pub opf: bool,
    pub cover: bool,
    pub jacket: bool,
    pub remove_jacket: bool,
    pub smarten_punctuation: bool,
    pub remove_unused_css: bool,
    pub compress_images: bool,
    pub upgrade_book: bool,
    pub add_soft_hyphens: bool,
    pub remove_soft_hyphens: bool,
}

impl PolishOptions {
    pub fn smarten_punctuation_only() -> Self {
        Self {
            smarten_punctuation: true,
            ..Self::default()
        }
    }
}

/// 宿主的排版处理，按 `输入 -> 输出` 路径映射原地改写文件。
pub trait Polisher: Send + Sync {
    fn polish(
        &self,
        files: &BTreeMap<PathBuf, PathBuf>,
        options: &PolishOptions,
        log: &mut dyn FnMut(&str),
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings json at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("settings store at {0} is not a json object")]
    NotAnObject(PathBuf),
}

/// 宿主的命名空间设置存储（按书库区分）。
pub trait SettingsStore: Send + Sync {
    fn get_namespaced(&self, namespace: &str, key: &str) -> Option<Value>;

    fn set_namespaced(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError>;
}

/// One open library of the host: its identity plus its settings store.
pub trait LibraryDb: Send + Sync {
    fn library_id(&self) -> String;

    fn prefs(&self) -> &dyn SettingsStore;
}

pub type SharedLibrary = Arc<dyn LibraryDb>;
