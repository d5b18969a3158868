//! 测试用的故事库替身：可配置章节数、已有文件、失败方式，并记录调用。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use super::host::{PolishOptions, Polisher};
use super::story::META_NUM_CHAPTERS;
use super::{
    Adapter, Configuration, PageCache, Story, StoryError, StoryLibrary, TlsVerification,
    UpdateData, Writer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    /// `fetch_story_metadata_only` returns an error.
    FetchError,
    /// `fetch_story_metadata_only` panics.
    FetchPanic,
    WriteError,
}

/// What the mock saw during one task.
#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub writes: usize,
    pub tls: Vec<TlsVerification>,
    pub written_configs: Vec<Configuration>,
    pub written_stories: Vec<Story>,
    pub logfiles: Vec<Option<String>>,
    pub update_states: Vec<UpdateData>,
    pub hook_calls: Vec<usize>,
    pub page_cache_sizes: Vec<usize>,
    pub series: Vec<(String, f64)>,
    pub cookiejars: Vec<PathBuf>,
    pub adult: Vec<bool>,
    pub credentials: Vec<(Option<String>, Option<String>)>,
    pub chapter_ranges: Vec<(Option<u32>, Option<u32>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockLibrary {
    /// Chapter count the "web site" reports.
    pub chapters: usize,
    /// Chapter count of any existing file handed in for update.
    pub existing_chapters: usize,
    pub existing_logfile: Option<String>,
    /// Count returned by the update hook.
    pub hook_result: Option<usize>,
    pub failure: Option<Failure>,
    pub calls: Arc<Mutex<Calls>>,
}

impl MockLibrary {
    pub fn new(chapters: usize) -> Self {
        Self {
            chapters,
            existing_chapters: 0,
            existing_logfile: None,
            hook_result: None,
            failure: None,
            calls: Arc::new(Mutex::new(Calls::default())),
        }
    }

    pub fn with_existing(mut self, chapters: usize) -> Self {
        self.existing_chapters = chapters;
        self
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn writes(&self) -> usize {
        self.calls.lock().unwrap().writes
    }
}

impl StoryLibrary for MockLibrary {
    fn get_configuration(
        &self,
        url: &str,
        format: &str,
        personal_ini: &str,
    ) -> Result<Configuration, StoryError> {
        let site = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("example.com");
        let mut config = Configuration::new(site, format);
        config.read_str(personal_ini);
        Ok(config)
    }

    fn get_adapter(
        &self,
        _configuration: &Configuration,
        url: &str,
        tls: TlsVerification,
    ) -> Result<Box<dyn Adapter>, StoryError> {
        self.calls.lock().unwrap().tls.push(tls);
        let mut story = Story::new();
        story.set_metadata("storyUrl", url);
        story.set_metadata("title", "Mock Story");
        Ok(Box::new(MockAdapter {
            source: self.clone(),
            story,
            logfile: None,
        }))
    }

    fn get_writer(
        &self,
        _format: &str,
        _configuration: &Configuration,
    ) -> Result<Box<dyn Writer>, StoryError> {
        Ok(Box::new(MockWriter {
            source: self.clone(),
        }))
    }

    fn get_update_data(&self, _path: &Path) -> Result<UpdateData, StoryError> {
        Ok(UpdateData {
            url: Some("https://example.com/s/1".to_string()),
            chapter_count: self.existing_chapters,
            old_chapters: (0..self.existing_chapters)
                .map(|n| format!("<p>chapter {n}</p>"))
                .collect(),
            logfile: self.existing_logfile.clone(),
            ..UpdateData::default()
        })
    }
}

struct MockAdapter {
    source: MockLibrary,
    story: Story,
    #[allow(dead_code)]
    logfile: Option<String>,
}

impl Adapter for MockAdapter {
    fn set_is_adult(&mut self, is_adult: bool) {
        self.source.calls.lock().unwrap().adult.push(is_adult);
    }

    fn set_credentials(&mut self, username: Option<&str>, password: Option<&str>) {
        self.source
            .calls
            .lock()
            .unwrap()
            .credentials
            .push((username.map(str::to_string), password.map(str::to_string)));
    }

    fn set_chapters_range(&mut self, begin: Option<u32>, end: Option<u32>) {
        self.source
            .calls
            .lock()
            .unwrap()
            .chapter_ranges
            .push((begin, end));
    }

    fn load_cookiejar(&mut self, path: &Path) -> Result<(), StoryError> {
        self.source
            .calls
            .lock()
            .unwrap()
            .cookiejars
            .push(path.to_path_buf());
        Ok(())
    }

    fn set_page_cache(&mut self, cache: PageCache) {
        // 写入一页，用于检验任务拿到的是独立副本
        cache.insert("https://example.com/mock-page", "<html/>");
        self.source
            .calls
            .lock()
            .unwrap()
            .page_cache_sizes
            .push(cache.len());
    }

    fn fetch_story_metadata_only(&mut self) -> Result<(), StoryError> {
        match self.source.failure {
            Some(Failure::FetchError) => Err(anyhow!("site returned 503").into()),
            Some(Failure::FetchPanic) => panic!("adapter bug"),
            _ => {
                self.story
                    .set_metadata(META_NUM_CHAPTERS, self.source.chapters.to_string());
                Ok(())
            }
        }
    }

    fn set_series(&mut self, name: &str, index: f64) {
        self.story.set_metadata("series", format!("{name} [{index}]"));
        self.source
            .calls
            .lock()
            .unwrap()
            .series
            .push((name.to_string(), index));
    }

    fn story(&self) -> &Story {
        &self.story
    }

    fn story_mut(&mut self) -> &mut Story {
        &mut self.story
    }

    fn set_update_state(&mut self, data: UpdateData) {
        self.logfile = data.logfile.clone();
        self.source.calls.lock().unwrap().update_states.push(data);
    }

    fn set_logfile(&mut self, logfile: Option<String>) {
        self.source.calls.lock().unwrap().logfiles.push(logfile.clone());
        self.logfile = logfile;
    }

    fn hook_for_updates(&mut self, chapter_count: usize) -> usize {
        self.source
            .calls
            .lock()
            .unwrap()
            .hook_calls
            .push(chapter_count);
        self.source.hook_result.unwrap_or(chapter_count)
    }
}

struct MockWriter {
    source: MockLibrary,
}

impl Writer for MockWriter {
    fn write_story(
        &mut self,
        configuration: &Configuration,
        adapter: &mut dyn Adapter,
        outfile: &Path,
        _force_overwrite: bool,
    ) -> Result<(), StoryError> {
        if self.source.failure == Some(Failure::WriteError) {
            return Err(StoryError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "output directory is read-only",
            )));
        }
        if let Some(parent) = outfile.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(outfile, adapter.story().dump_html_metadata())?;

        let mut calls = self.source.calls.lock().unwrap();
        calls.writes += 1;
        calls.written_configs.push(configuration.clone());
        calls.written_stories.push(adapter.story().clone());
        Ok(())
    }
}

/// Polisher double that records each call and emits one log line.
#[derive(Debug, Default)]
pub(crate) struct MockPolisher {
    pub calls: Mutex<Vec<(BTreeMap<PathBuf, PathBuf>, PolishOptions)>>,
}

impl Polisher for MockPolisher {
    fn polish(
        &self,
        files: &BTreeMap<PathBuf, PathBuf>,
        options: &PolishOptions,
        log: &mut dyn FnMut(&str),
    ) -> anyhow::Result<()> {
        log("smartened quotes");
        self.calls.lock().unwrap().push((files.clone(), *options));
        Ok(())
    }
}
