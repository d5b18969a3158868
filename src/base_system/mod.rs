//! 基础设施：配置、日志、插件设置。
//!
//! - `config` / `context`：YAML 工具配置
//! - `logging`：全局日志与任务日志捕获
//! - `prefs`：按书库缓存的插件设置
//! - `prefs_store`：JSON 文件形式的设置存储与书库

pub mod config;
pub mod context;
pub mod logging;
pub mod prefs;
pub mod prefs_store;
