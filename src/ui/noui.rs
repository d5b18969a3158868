use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;
use tracing::info;

use crate::base_system::prefs::{
    GENCALCOVER_ORDER, PrefsFacade, UPDATECALCOVER_ORDER, calcover_save_option,
};
use crate::base_system::prefs_store::FileLibrary;
use crate::third_party::UpdateData;
use crate::third_party::host::SharedLibrary;

#[derive(Debug, Clone, Subcommand)]
pub enum PrefsAction {
    /// 显示全部生效的设置（默认值 + 书库中的值）
    Show,
    /// 显示单个设置
    Get { key: String },
    /// 修改单个设置并保存到书库；VALUE 按 JSON 解析，失败时当作字符串
    Set { key: String, value: String },
    /// 删除书库中的单个设置（回落到默认值）并保存
    Unset { key: String },
}

pub fn run_prefs(library_dir: &Path, action: &PrefsAction) -> Result<()> {
    let library = FileLibrary::open(library_dir)
        .with_context(|| format!("打开书库失败: {}", library_dir.display()))?;
    info!(target: "prefs", library = %library.root().display(), "使用书库");
    let library: SharedLibrary = Arc::new(library);
    let mut prefs = PrefsFacade::with_library(library);

    let mut out = io::stdout().lock();
    match action {
        PrefsAction::Show => {
            let settings = prefs.snapshot();
            writeln!(out, "{}", serde_json::to_string_pretty(&settings)?)?;
        }
        PrefsAction::Get { key } => {
            let value = prefs.get(key)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        }
        PrefsAction::Set { key, value } => {
            let value = parse_value(key, value);
            prefs.set(key, value.clone());
            prefs.save_to_db().context("保存设置失败")?;
            writeln!(out, "{key} = {value}")?;
        }
        PrefsAction::Unset { key } => {
            prefs.remove(key);
            prefs.save_to_db().context("保存设置失败")?;
            writeln!(out, "{key} 已恢复默认值")?;
        }
    }
    Ok(())
}

/// JSON first; plain text otherwise. Cover options are stored by their
/// saved name, so display strings are translated.
fn parse_value(key: &str, raw: &str) -> Value {
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    if matches!(key, "updatecalcover" | "gencalcover")
        && let Value::String(s) = &value
        && (UPDATECALCOVER_ORDER.contains(&s.as_str()) || GENCALCOVER_ORDER.contains(&s.as_str()))
        && let Some(saved) = calcover_save_option(s)
    {
        return Value::String(saved.to_string());
    }
    value
}

pub fn run_inspect(epub: &Path) -> Result<()> {
    let data = UpdateData::read_epub(epub)
        .with_context(|| format!("读取 EPUB 失败: {}", epub.display()))?;
    let mut out = io::stdout().lock();
    write_summary(&mut out, epub, &data)?;
    Ok(())
}

fn write_summary(out: &mut impl Write, epub: &Path, data: &UpdateData) -> io::Result<()> {
    writeln!(out, "文件: {}", epub.display())?;
    writeln!(out, "来源: {}", data.url.as_deref().unwrap_or("(无)"))?;
    writeln!(out, "章节数: {}", data.chapter_count)?;
    writeln!(out, "图片数: {}", data.old_images.len())?;
    match &data.old_cover {
        Some((href, bytes)) => writeln!(out, "封面: {href} ({} bytes)", bytes.len())?,
        None => writeln!(out, "封面: (无)")?,
    }
    writeln!(
        out,
        "书签: {}",
        if data.calibre_bookmark.is_some() { "有" } else { "无" }
    )?;
    writeln!(
        out,
        "日志页: {}",
        data.logfile
            .as_ref()
            .map(|l| format!("{} bytes", l.len()))
            .unwrap_or_else(|| "(无)".to_string())
    )?;
    Ok(())
}
