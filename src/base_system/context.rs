//! 工具配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `fanfic-jobs.yml` 的字段元信息。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // 书库配置
    #[serde(default)]
    pub library_path: String,

    // 日志配置
    #[serde(default = "default_true")]
    pub archive_logs: bool,
    #[serde(default = "default_true")]
    pub console_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_path: String::new(),
            archive_logs: default_true(),
            console_log: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "fanfic-jobs.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 3] = [
            FieldMeta {
                name: "library_path",
                description: "书库目录（保存 metadata_db_prefs_backup.json），留空则使用数据目录下的 library",
            },
            FieldMeta {
                name: "archive_logs",
                description: "退出时把 latest.log 打包为 zip",
            },
            FieldMeta {
                name: "console_log",
                description: "是否在终端输出日志",
            },
        ];
        &FIELDS
    }
}

impl Config {
    pub fn library_dir(&self, base_dir: &Path) -> PathBuf {
        if self.library_path.trim().is_empty() {
            base_dir.join("library")
        } else {
            PathBuf::from(self.library_path.trim())
        }
    }
}

fn default_true() -> bool {
    true
}
