//! fanfic-jobs：书库插件的批量下载编排、单书下载任务与插件设置。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/插件设置等基础设施
//! - `download`：工作线程池、单书任务与批量编排
//! - `third_party`：故事抓取库与宿主应用的调用契约
//! - `ui`：命令行处理

// 默认设置表的 json! 字面量较深
#![recursion_limit = "256"]

pub mod base_system;
pub mod download;
pub mod third_party;
pub mod ui;
