//! 外部协作方的调用契约。
//!
//! 站点适配器、格式写出器、宿主的排版（polish）与命名空间设置存储都不在本 crate 内实现，
//! 这里只定义它们的 trait 以及在两侧之间流动的数据结构：
//! - `configuration`：故事配置（INI 风格分节，带优先级）
//! - `story`：故事元数据
//! - `update_data`：从已有 EPUB 读取更新所需的数据
//! - `host`：宿主侧契约（排版、设置存储、版本）

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;

pub mod configuration;
pub mod host;
pub mod story;
pub mod update_data;

#[cfg(test)]
pub(crate) mod testing;

pub use configuration::Configuration;
pub use story::Story;
pub use update_data::UpdateData;

/// Icon hint used for every unexpected failure.
pub const ICON_ERROR: &str = "dialog_error.png";

#[derive(Debug, Error)]
pub enum StoryError {
    /// 业务规则拒绝（例如站点章节数少于已有文件），不是程序错误。
    #[error("{message}")]
    NotGoingToDownload { message: String, icon: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StoryError {
    pub fn not_going_to_download(message: impl Into<String>, icon: impl Into<String>) -> Self {
        Self::NotGoingToDownload {
            message: message.into(),
            icon: icon.into(),
        }
    }
}

/// Certificate verification for one adapter's connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVerification {
    #[default]
    Verified,
    Unverified,
}

/// 运行期共享的页面缓存（url -> 页面内容）。
///
/// 每个任务拿到的是 `detached()` 后的独立副本，任务之间不会互相写入。
#[derive(Debug, Clone, Default)]
pub struct PageCache {
    pages: Arc<Mutex<HashMap<String, String>>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pages(pages: HashMap<String, String>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages)),
        }
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.pages.lock().ok()?.get(url).cloned()
    }

    pub fn insert(&self, url: impl Into<String>, page: impl Into<String>) {
        if let Ok(mut g) = self.pages.lock() {
            g.insert(url.into(), page.into());
        }
    }

    pub fn len(&self) -> usize {
        self.pages.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy that no longer shares storage with `self`.
    pub fn detached(&self) -> Self {
        let pages = self
            .pages
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default();
        Self::from_pages(pages)
    }
}

/// 站点适配器：封装一个故事来源的抓取逻辑。
pub trait Adapter: Send {
    fn set_is_adult(&mut self, is_adult: bool);

    fn set_credentials(&mut self, username: Option<&str>, password: Option<&str>);

    fn set_chapters_range(&mut self, begin: Option<u32>, end: Option<u32>);

    fn load_cookiejar(&mut self, path: &Path) -> Result<(), StoryError>;

    fn set_page_cache(&mut self, cache: PageCache);

    /// Fetches story metadata without chapter text.
    fn fetch_story_metadata_only(&mut self) -> Result<(), StoryError>;

    fn set_series(&mut self, name: &str, index: f64);

    fn story(&self) -> &Story;

    fn story_mut(&mut self) -> &mut Story;

    /// 更新模式：预先填入旧章节、图片、封面、书签和日志片段。
    fn set_update_state(&mut self, data: UpdateData);

    fn set_logfile(&mut self, logfile: Option<String>);

    /// Lets sites with non-monotonic chapter indexes adjust the existing count.
    fn hook_for_updates(&mut self, chapter_count: usize) -> usize {
        chapter_count
    }
}

/// 格式写出器：把抓取到的故事序列化为某种输出格式。
pub trait Writer: Send {
    fn write_story(
        &mut self,
        configuration: &Configuration,
        adapter: &mut dyn Adapter,
        outfile: &Path,
        force_overwrite: bool,
    ) -> Result<(), StoryError>;
}

/// 故事抓取库的入口（适配器/写出器工厂）。
pub trait StoryLibrary: Send + Sync {
    /// Effective configuration for one url/format pair with the user's
    /// personal overrides applied.
    fn get_configuration(
        &self,
        url: &str,
        format: &str,
        personal_ini: &str,
    ) -> Result<Configuration, StoryError>;

    fn get_adapter(
        &self,
        configuration: &Configuration,
        url: &str,
        tls: TlsVerification,
    ) -> Result<Box<dyn Adapter>, StoryError>;

    fn get_writer(
        &self,
        format: &str,
        configuration: &Configuration,
    ) -> Result<Box<dyn Writer>, StoryError>;

    fn get_update_data(&self, path: &Path) -> Result<UpdateData, StoryError> {
        UpdateData::read_epub(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_page_cache_does_not_share_writes() {
        let cache = PageCache::new();
        cache.insert("https://example.com/s/1", "<html>one</html>");

        let copy = cache.detached();
        copy.insert("https://example.com/s/2", "<html>two</html>");

        assert_eq!(cache.len(), 1);
        assert_eq!(copy.len(), 2);
        assert_eq!(
            copy.get("https://example.com/s/1").as_deref(),
            Some("<html>one</html>")
        );
    }

    #[test]
    fn rejection_displays_its_message() {
        let err = StoryError::not_going_to_download("too short", ICON_ERROR);
        assert_eq!(err.to_string(), "too short");
    }
}
