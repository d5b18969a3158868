use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{io, panic, thread, time::Duration};

use ctrlc;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{Subscriber, error, info};
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024; // 10MB
const ARCHIVE_WAIT_MS: u64 = 1000; // allow file handles to settle on Windows

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            archive_on_exit: true,
            console: true,
        }
    }
}

/// 任务日志缓冲区：工作线程内的日志写到这里，任务结束后作为 `details` 交给调度方。
#[derive(Clone, Default)]
struct BufferWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut g) = self.buf.lock() {
            g.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl BufferWriter {
    fn take_text(&self) -> String {
        let bytes = self
            .buf
            .lock()
            .map(|mut g| std::mem::take(&mut *g))
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Runs `f` with every event on this thread recorded into a private buffer
/// and returns the recorded text alongside the result.
pub fn capture_job_log<F, R>(f: F) -> (R, String)
where
    F: FnOnce() -> R,
{
    let writer = BufferWriter::default();
    let subscriber = fmt()
        .with_writer(writer.clone())
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_max_level(LevelFilter::DEBUG)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, writer.take_text())
}

pub struct LogSystem {
    runtime: Arc<LogRuntime>,
}

impl LogSystem {
    pub fn init(options: LogOptions) -> Result<Self, LogError> {
        Self::init_with_base(options, None)
    }

    pub fn init_with_base(options: LogOptions, base_dir: Option<&Path>) -> Result<Self, LogError> {
        let logs_dir = base_dir
            .map(|b| b.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        fs::create_dir_all(&logs_dir)?;
        let latest_log = logs_dir.join("latest.log");

        archive_if_large(&latest_log, &logs_dir, MAX_LOG_BYTES)?;

        let file_appender = rolling::never(&logs_dir, "latest.log");
        let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .finish(file_appender);

        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        let console_writer: BoxMakeWriter = if options.console {
            BoxMakeWriter::new(io::stderr)
        } else {
            BoxMakeWriter::new(io::sink)
        };

        tracing_subscriber::registry()
            .with(text_layer(console_writer, options.use_color, console_level))
            .with(text_layer(file_writer, false, LevelFilter::DEBUG))
            .try_init()
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("global subscriber") || msg.contains("already") {
                    LogError::AlreadyInitialized
                } else {
                    LogError::SubscriberInit(e)
                }
            })?;

        let runtime = Arc::new(LogRuntime {
            logs_dir,
            latest_log,
            guard: Mutex::new(Some(guard)),
            exit_called: AtomicBool::new(false),
            archive_on_exit: options.archive_on_exit,
        });

        runtime.install_signal_handler();
        runtime.install_panic_hook();

        Ok(Self { runtime })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.runtime.logs_dir
    }

    pub fn safe_exit(&self) {
        self.runtime.safe_exit();
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.runtime.safe_exit();
    }
}

struct LogRuntime {
    logs_dir: PathBuf,
    latest_log: PathBuf,
    guard: Mutex<Option<WorkerGuard>>,
    exit_called: AtomicBool,
    archive_on_exit: bool,
}

impl LogRuntime {
    fn install_signal_handler(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let _ = ctrlc::set_handler(move || {
            runtime.safe_exit();
            std::process::exit(130);
        });
    }

    fn install_panic_hook(self: &Arc<Self>) {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            // Worker threads catch their own unwinds; only the location is logged here.
            if let Some(location) = info.location() {
                error!("panic at {}:{}: {}", location.file(), location.line(), info);
            } else {
                error!("panic: {info}");
            }
            previous(info);
        }));
    }

    fn safe_exit(&self) {
        if self.exit_called.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }

        if self.archive_on_exit {
            thread::sleep(Duration::from_millis(ARCHIVE_WAIT_MS));
            if let Err(err) = archive_log_file(&self.latest_log, &self.logs_dir) {
                eprintln!("failed to archive log: {err}");
            }
        }
    }
}

fn text_layer<S, W>(writer: W, ansi: bool, level: LevelFilter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_thread_names(true)
        .with_ansi(ansi)
        .with_writer(writer)
        .with_filter(level)
}

fn archive_if_large(latest_log: &Path, logs_dir: &Path, limit: u64) -> Result<(), LogError> {
    if let Ok(meta) = fs::metadata(latest_log)
        && meta.len() >= limit
    {
        archive_log_file(latest_log, logs_dir)?;
    }
    Ok(())
}

fn archive_log_file(latest_log: &Path, logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    if !latest_log.exists() {
        return Ok(None);
    }
    let meta = fs::metadata(latest_log)?;
    if meta.len() == 0 {
        let _ = fs::remove_file(latest_log);
        return Ok(None);
    }

    let timestamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let archive_path = logs_dir.join(format!("log_{timestamp}.zip"));
    let temp_log = logs_dir.join(format!("temp_{timestamp}.log"));
    fs::copy(latest_log, &temp_log)?;

    let file = File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{timestamp}.log"), options)?;

    let mut temp_file = File::open(&temp_log)?;
    io::copy(&mut temp_file, &mut zip)?;
    zip.finish()?;

    let _ = fs::remove_file(&temp_log);
    let _ = fs::remove_file(latest_log);

    info!("log archived to {}", archive_path.display());
    Ok(Some(archive_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, warn};

    #[test]
    fn captured_log_contains_thread_events() {
        let (value, text) = capture_job_log(|| {
            info!("write to {}", "/tmp/story.epub");
            debug!(chapters = 3, "fetched metadata");
            warn!("cover missing");
            7
        });
        assert_eq!(value, 7);
        assert!(text.contains("write to /tmp/story.epub"));
        assert!(text.contains("fetched metadata"));
        assert!(text.contains("chapters=3"));
        assert!(text.contains("WARN"));
    }

    #[test]
    fn captures_are_isolated_per_call() {
        let (_, first) = capture_job_log(|| info!("first job"));
        let (_, second) = capture_job_log(|| info!("second job"));
        assert!(first.contains("first job"));
        assert!(!second.contains("first job"));
    }

    #[test]
    fn archive_zips_and_removes_latest_log() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join("latest.log");
        fs::write(&latest, "line one\nline two\n").unwrap();

        let archived = archive_log_file(&latest, dir.path()).unwrap().unwrap();
        assert!(archived.exists());
        assert!(!latest.exists());

        let mut archive = zip::ZipArchive::new(File::open(&archived).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        let mut text = String::new();
        io::Read::read_to_string(&mut archive.by_index(0).unwrap(), &mut text).unwrap();
        assert_eq!(text, "line one\nline two\n");
    }

    #[test]
    fn only_oversized_logs_are_archived_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join("latest.log");
        fs::write(&latest, "0123456789").unwrap();

        archive_if_large(&latest, dir.path(), 11).unwrap();
        assert!(latest.exists());

        archive_if_large(&latest, dir.path(), 10).unwrap();
        assert!(!latest.exists());
        let zips = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "zip"))
            .count();
        assert_eq!(zips, 1);
    }

    #[test]
    fn empty_log_is_removed_not_archived() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join("latest.log");
        fs::write(&latest, "").unwrap();
        assert!(archive_log_file(&latest, dir.path()).unwrap().is_none());
        assert!(!latest.exists());
    }
}
