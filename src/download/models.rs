//! 下载相关的数据模型定义。
//!
//! 包含书籍描述（BookDescriptor）、批次共享选项（DownloadOptions）、冲突策略、输出格式等。

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::third_party::PageCache;
use crate::third_party::host::HostVersion;

pub const STATUS_ERROR: &str = "Error";

/// 宿主中的一列自定义列（标签 + 值）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibreColumn {
    pub label: String,
    pub val: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibreSeries {
    pub name: String,
    pub index: f64,
}

/// One book of a batch. Created by the caller, mutated by the worker task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookDescriptor {
    pub url: String,
    #[serde(default)]
    pub calibre_id: Option<i64>,
    #[serde(default)]
    pub title: String,
    /// `false` means the book is never dispatched.
    #[serde(default)]
    pub good: bool,
    #[serde(default)]
    pub begin: Option<u32>,
    #[serde(default)]
    pub end: Option<u32>,
    #[serde(default)]
    pub is_adult: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub outfile: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epub_for_update: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibre_series: Option<CalibreSeries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibre_columns: Option<BTreeMap<String, CalibreColumn>>,

    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savemetacol: Option<String>,

    /// Caller fields this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BookDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            good: true,
            ..Default::default()
        }
    }

    /// `url:(<url>) id:(<calibre_id>)`
    pub fn job_description(&self) -> String {
        format!("url:({}) id:({})", self.url, self.id_label())
    }

    pub fn id_label(&self) -> String {
        self.calibre_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "None".to_string())
    }

    pub(crate) fn mark_failed(&mut self, message: String, icon: &str) {
        self.good = false;
        self.comment = message;
        self.icon = Some(icon.to_string());
        self.status = Some(STATUS_ERROR.to_string());
    }
}

/// 已有同一本书时的处理策略。序列化为保存到设置中的字符串。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollisionPolicy {
    #[serde(rename = "Add New Book")]
    AddNew,
    #[serde(rename = "Skip")]
    Skip,
    #[serde(rename = "Overwrite If Newer")]
    Overwrite,
    #[serde(rename = "Overwrite Always")]
    OverwriteAlways,
    #[serde(rename = "Update EPUB if New Chapters")]
    Update,
    #[serde(rename = "Update EPUB Always")]
    UpdateAlways,
    #[serde(rename = "Update Calibre Metadata Only")]
    CalibreOnly,
    #[serde(rename = "Update Calibre Metadata from Saved Metadata Column")]
    CalibreOnlySaveCol,
}

impl CollisionPolicy {
    pub const ALL: [CollisionPolicy; 8] = [
        CollisionPolicy::AddNew,
        CollisionPolicy::Skip,
        CollisionPolicy::Overwrite,
        CollisionPolicy::OverwriteAlways,
        CollisionPolicy::Update,
        CollisionPolicy::UpdateAlways,
        CollisionPolicy::CalibreOnly,
        CollisionPolicy::CalibreOnlySaveCol,
    ];

    pub fn saved_name(self) -> &'static str {
        match self {
            CollisionPolicy::AddNew => "Add New Book",
            CollisionPolicy::Skip => "Skip",
            CollisionPolicy::Overwrite => "Overwrite If Newer",
            CollisionPolicy::OverwriteAlways => "Overwrite Always",
            CollisionPolicy::Update => "Update EPUB if New Chapters",
            CollisionPolicy::UpdateAlways => "Update EPUB Always",
            CollisionPolicy::CalibreOnly => "Update Calibre Metadata Only",
            CollisionPolicy::CalibreOnlySaveCol => {
                "Update Calibre Metadata from Saved Metadata Column"
            }
        }
    }

    pub fn from_saved_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.saved_name() == name)
    }

    pub fn is_update(self) -> bool {
        matches!(self, CollisionPolicy::Update | CollisionPolicy::UpdateAlways)
    }

    pub fn is_metadata_only(self) -> bool {
        matches!(
            self,
            CollisionPolicy::CalibreOnly | CollisionPolicy::CalibreOnlySaveCol
        )
    }
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.saved_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Epub,
    Html,
    Txt,
    Mobi,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Epub => "epub",
            OutputFormat::Html => "html",
            OutputFormat::Txt => "txt",
            OutputFormat::Mobi => "mobi",
        }
    }

    /// 只有 epub 与 html 会包含图片。
    pub fn supports_images(self) -> bool {
        matches!(self, OutputFormat::Epub | OutputFormat::Html)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次批量下载中所有任务共享的只读选项。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub fileform: OutputFormat,
    pub collision: CollisionPolicy,
    #[serde(default)]
    pub updateepubcover: bool,
    #[serde(rename = "personal.ini", default)]
    pub personal_ini: String,
    #[serde(default)]
    pub cookiejarfile: Option<PathBuf>,
    #[serde(skip)]
    pub pagecache: PageCache,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub plugin_path: PathBuf,
    #[serde(default)]
    pub smarten_punctuation: bool,
    #[serde(default)]
    pub host_version: HostVersion,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            fileform: OutputFormat::default(),
            collision: CollisionPolicy::Update,
            updateepubcover: false,
            personal_ini: String::new(),
            cookiejarfile: None,
            pagecache: PageCache::default(),
            version: None,
            plugin_path: PathBuf::new(),
            smarten_punctuation: false,
            host_version: HostVersion::default(),
        }
    }
}
