//! 单本书的下载任务。
//!
//! 流程：取配置 → 调整配置 → 建立适配器 → 只抓元数据 → 按冲突策略决定写出方式 →
//! 写出 → 可选的标点美化。任何结果（成功、业务拒绝、异常）都编码进返回的
//! `BookDescriptor`，本函数自身不会向外返回错误或 panic。

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::job_server::panic_message;
use super::models::{BookDescriptor, CollisionPolicy, DownloadOptions, OutputFormat};
use crate::third_party::configuration::{SECTION_INJECTED, SECTION_OVERRIDES};
use crate::third_party::host::{HostVersion, PolishOptions, Polisher};
use crate::third_party::story::META_NUM_CHAPTERS;
use crate::third_party::{
    Configuration, ICON_ERROR, Story, StoryError, StoryLibrary, TlsVerification,
};

/// Everything a task needs besides the book and the batch options.
#[derive(Clone)]
pub struct WorkerServices {
    pub library: Arc<dyn StoryLibrary>,
    pub polisher: Option<Arc<dyn Polisher>>,
}

impl WorkerServices {
    pub fn new(library: Arc<dyn StoryLibrary>) -> Self {
        Self {
            library,
            polisher: None,
        }
    }

    pub fn with_polisher(mut self, polisher: Arc<dyn Polisher>) -> Self {
        self.polisher = Some(polisher);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Pending,
    FetchingMetadata,
    Writing,
    SkippedMetadataOnly,
    FailedPrecheck,
    Done,
    Failed,
}

impl TaskPhase {
    fn as_str(self) -> &'static str {
        match self {
            TaskPhase::Pending => "pending",
            TaskPhase::FetchingMetadata => "fetching-metadata",
            TaskPhase::Writing => "writing",
            TaskPhase::SkippedMetadataOnly => "skipped-metadata-only",
            TaskPhase::FailedPrecheck => "failed-precheck",
            TaskPhase::Done => "done",
            TaskPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 写出方式，在抓取元数据后按冲突策略一次性确定。
#[derive(Debug)]
enum WritePlan {
    MetadataOnly,
    /// Write from scratch, keeping the log page of a replaced file.
    Fresh { preserve_log_from: Option<PathBuf> },
    Update { existing: PathBuf },
}

impl WritePlan {
    fn choose(collision: CollisionPolicy, epub_for_update: Option<&PathBuf>) -> Self {
        match (collision, epub_for_update) {
            (c, _) if c.is_metadata_only() => WritePlan::MetadataOnly,
            (c, Some(existing)) if c.is_update() => WritePlan::Update {
                existing: existing.clone(),
            },
            (_, existing) => WritePlan::Fresh {
                preserve_log_from: existing.cloned(),
            },
        }
    }
}

struct TaskState {
    phase: TaskPhase,
}

impl TaskState {
    fn enter(&mut self, next: TaskPhase) {
        debug!(from = %self.phase, to = %next, "task phase");
        self.phase = next;
    }
}

/// Runs one book to completion and returns its updated descriptor.
pub fn do_download_for_worker(
    mut book: BookDescriptor,
    options: &DownloadOptions,
    services: &WorkerServices,
) -> BookDescriptor {
    info!("Download started: {}", book.job_description());
    let mut state = TaskState {
        phase: TaskPhase::Pending,
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        download_story(&mut book, options, services, &mut state)
    }));

    match outcome {
        Ok(Ok(())) => state.enter(TaskPhase::Done),
        Ok(Err(StoryError::NotGoingToDownload { message, icon })) => {
            info!("not going to download {}: {message}", book.url);
            state.enter(TaskPhase::FailedPrecheck);
            book.good = false;
            book.comment = message;
            book.icon = Some(icon);
        }
        Ok(Err(err)) => {
            error!("Exception: {}: {err:#}", book.job_description());
            state.enter(TaskPhase::Failed);
            book.mark_failed(err.to_string(), ICON_ERROR);
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Exception: {}: panic: {message}", book.job_description());
            state.enter(TaskPhase::Failed);
            book.mark_failed(message, ICON_ERROR);
        }
    }
    book
}

fn download_story(
    book: &mut BookDescriptor,
    options: &DownloadOptions,
    services: &WorkerServices,
    state: &mut TaskState,
) -> Result<(), StoryError> {
    book.comment = "Download started...".to_string();
    let fileform = options.fileform.as_str();

    let mut configuration =
        services
            .library
            .get_configuration(&book.url, fileform, &options.personal_ini)?;
    let tls = adjust_configuration(&mut configuration, book, options);

    let mut adapter = services.library.get_adapter(&configuration, &book.url, tls)?;
    adapter.set_is_adult(book.is_adult);
    adapter.set_credentials(book.username.as_deref(), book.password.as_deref());
    adapter.set_chapters_range(book.begin, book.end);
    if let Some(jar) = options.cookiejarfile.as_deref() {
        adapter.load_cookiejar(jar)?;
        debug!("cookiejar:{}", jar.display());
    }
    adapter.set_page_cache(options.pagecache.detached());

    state.enter(TaskPhase::FetchingMetadata);
    adapter.fetch_story_metadata_only()?;
    if let Some(series) = &book.calibre_series {
        adapter.set_series(&series.name, series.index);
    }
    if let Some(version) = &options.version {
        adapter.story_mut().set_metadata("version", version.as_str());
    }

    let mut writer = services.library.get_writer(fileform, &configuration)?;
    let outfile = book.outfile.clone();

    match WritePlan::choose(options.collision, book.epub_for_update.as_ref()) {
        WritePlan::MetadataOnly => {
            warn!("Skipping metadata-only 'update' inside worker, this should not happen here");
            state.enter(TaskPhase::SkippedMetadataOnly);
            book.comment = "Metadata collected.".to_string();
            record_metadata(book, adapter.story());
            // Return before polishing: no output file exists, so the polish
            // pass is deliberately not run here.
            return Ok(());
        }
        WritePlan::Fresh { preserve_log_from } => {
            if let Some(existing) = preserve_log_from {
                let logfile = services.library.get_update_data(&existing)?.logfile;
                // 旧条目改成 notid，写出时会整体新建一组日志条目
                adapter.set_logfile(logfile.map(|l| l.replace("span id", "span notid")));
            }

            state.enter(TaskPhase::Writing);
            info!("write to {}", outfile.display());
            inject_cal_cols(book, adapter.story_mut(), &mut configuration);
            writer.write_story(&configuration, &mut *adapter, &outfile, true)?;

            let chapters = adapter
                .story()
                .get_metadata(META_NUM_CHAPTERS)
                .unwrap_or_default();
            book.comment = format!("Download {fileform} completed, {chapters} chapters.");
            record_metadata(book, adapter.story());
        }
        WritePlan::Update { existing } => {
            let url_chapters = adapter.story().num_chapters()?;
            let update = services.library.get_update_data(&existing)?;
            let mut chapter_count = update.chapter_count;
            adapter.set_update_state(update);

            if options.collision == CollisionPolicy::Update && chapter_count == url_chapters {
                book.comment = format!("Already contains {chapter_count} chapters.  Reuse as is.");
                record_metadata(book, adapter.story());
                book.outfile = existing;
                return Ok(());
            }

            if chapter_count > url_chapters {
                return Err(StoryError::not_going_to_download(
                    format!(
                        "Existing epub contains {chapter_count} chapters, web site only has {url_chapters}. Use Overwrite to force update."
                    ),
                    ICON_ERROR,
                ));
            }

            let forced_same = options.collision == CollisionPolicy::UpdateAlways
                && chapter_count == url_chapters;
            if !forced_same && configuration.get_bool("do_update_hook") {
                chapter_count = adapter.hook_for_updates(chapter_count);
                if chapter_count > url_chapters {
                    warn!(
                        "update hook returned {chapter_count} chapters, more than the {url_chapters} on the web site; reporting 0 added"
                    );
                }
            }

            state.enter(TaskPhase::Writing);
            info!("Do update - epub({chapter_count}) vs url({url_chapters})");
            info!("write to {}", outfile.display());
            inject_cal_cols(book, adapter.story_mut(), &mut configuration);
            writer.write_story(&configuration, &mut *adapter, &outfile, true)?;

            book.comment = format!(
                "Update {fileform} completed, added {} chapters for {url_chapters} total.",
                url_chapters.saturating_sub(chapter_count)
            );
            record_metadata(book, adapter.story());
        }
    }

    smarten_punctuation(&outfile, options, services)?;
    Ok(())
}

/// 返回本适配器使用的证书校验方式，并就地修改 `[overrides]`。
fn adjust_configuration(
    configuration: &mut Configuration,
    book: &BookDescriptor,
    options: &DownloadOptions,
) -> TlsVerification {
    let tls = if configuration.get_bool("use_ssl_unverified_context") {
        warn!("certificate verification disabled for {}", book.url);
        TlsVerification::Unverified
    } else {
        TlsVerification::Verified
    };

    if !options.updateepubcover && book.epub_for_update.is_some() && options.collision.is_update()
    {
        configuration.set(SECTION_OVERRIDES, "never_make_cover", "true");
    }

    // images only for epub and html, even if turned on elsewhere
    if !options.fileform.supports_images() {
        configuration.set(SECTION_OVERRIDES, "include_images", "false");
    }
    tls
}

fn record_metadata(book: &mut BookDescriptor, story: &Story) {
    book.all_metadata = Some(story.all_metadata(true));
    book.savemetacol = Some(story.dump_html_metadata());
}

/// Copies the book's custom column values into the story and exposes them
/// to the writer through a freshly built `[injected]` section.
pub fn inject_cal_cols(book: &BookDescriptor, story: &mut Story, configuration: &mut Configuration) {
    configuration.remove_section(SECTION_INJECTED);
    let Some(columns) = book.calibre_columns.as_ref() else {
        return;
    };

    let mut ini = vec![format!("[{SECTION_INJECTED}]")];
    let mut extra_valid = Vec::with_capacity(columns.len());
    for (key, column) in columns {
        story.set_metadata(key, column.val.clone());
        ini.push(format!("{key}_label:{}", column.label));
        extra_valid.push(key.as_str());
    }
    if !extra_valid.is_empty() {
        ini.push(format!("add_to_extra_valid_entries:,{}", extra_valid.join(",")));
        configuration.read_str(&ini.join("\n"));
    }
}

fn smarten_punctuation(
    outfile: &Path,
    options: &DownloadOptions,
    services: &WorkerServices,
) -> Result<(), StoryError> {
    if !options.smarten_punctuation
        || options.fileform != OutputFormat::Epub
        || options.host_version < HostVersion::SMARTEN_PUNCTUATION
    {
        return Ok(());
    }
    let Some(polisher) = services.polisher.as_ref() else {
        warn!("smarten_punctuation requested but no polisher is available");
        return Ok(());
    };

    let files = BTreeMap::from([(outfile.to_path_buf(), outfile.to_path_buf())]);
    let mut log = |line: &str| info!("{line}");
    polisher.polish(&files, &PolishOptions::smarten_punctuation_only(), &mut log)?;
    Ok(())
}
