//! 交互层入口。
//!
//! 只有无 UI 的命令行实现：设置的查看/修改，以及已有 EPUB 的检查。

pub mod noui;
