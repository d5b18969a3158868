//! 批量下载编排：每本可下载的书提交为一个任务，排空完成队列并合并结果。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::job_server::{JobEvent, JobId, JobServer, ParallelJob};
use super::models::BookDescriptor;
use super::models::DownloadOptions;
use super::progress::{ProgressCallback, make_reporter};
use super::worker::{WorkerServices, do_download_for_worker};
use crate::third_party::ICON_ERROR;

/// Downloads every `good` book of `book_list` on a pool of `cpus` workers.
///
/// The returned list has the same length as the input. Books that were not
/// `good` are returned untouched; each processed book is removed and its
/// post-task descriptor appended, so results arrive in completion order.
pub fn do_download_worker(
    book_list: Vec<BookDescriptor>,
    options: DownloadOptions,
    services: WorkerServices,
    cpus: usize,
    notification: Option<ProgressCallback>,
) -> Vec<BookDescriptor> {
    let options = Arc::new(options);
    let mut server: JobServer<BookDescriptor> = JobServer::new(cpus);

    info!("{}", options.version.as_deref().unwrap_or("unknown version"));
    info!("Adding jobs for URLs:");

    // (job, source book); the job id correlates completions back to the slot
    let mut slots: Vec<(Option<JobId>, BookDescriptor)> = Vec::with_capacity(book_list.len());
    let mut total = 0usize;
    for book in book_list {
        info!("{}", book.url);
        if !book.good {
            // already bad before any job started
            slots.push((None, book));
            continue;
        }
        total += 1;
        let options = Arc::clone(&options);
        let services = services.clone();
        let task_book = book.clone();
        let job = server.add_job(ParallelJob::new(book.job_description(), move |_| {
            do_download_for_worker(task_book, &options, &services)
        }));
        slots.push((Some(job), book));
    }

    let mut progress = make_reporter(total, notification);
    progress.emit(0.01, "Downloading FanFiction Stories");

    let mut completed = 0usize;
    while completed < total {
        let event = match server.changed_jobs().recv() {
            Ok(event) => event,
            Err(_) => {
                warn!("job queue closed with {} of {total} stories outstanding", total - completed);
                break;
            }
        };
        let (job, result, details) = match event {
            JobEvent::Notification {
                job,
                fraction,
                message,
            } => {
                debug!(job, fraction, "{message}");
                continue;
            }
            JobEvent::Finished {
                job,
                result,
                details,
            } => (job, result, details),
        };

        let Some(pos) = slots.iter().position(|(id, _)| *id == Some(job)) else {
            warn!(job, "completion for unknown job");
            continue;
        };
        let (_, source) = slots.remove(pos);
        let finished = result.unwrap_or_else(|failure| {
            let mut failed = source.clone();
            failed.mark_failed(failure.message, ICON_ERROR);
            failed
        });
        slots.push((None, finished));

        completed += 1;
        progress.emit(
            completed as f64 / total as f64,
            &format!("{completed} of {total} stories finished downloading"),
        );
        info!("Logfile for book ID {} ({})", source.id_label(), source.title);
        info!("{details}");
    }

    if total == 0 {
        progress.emit(1.0, "0 of 0 stories finished downloading");
    }

    let books: Vec<BookDescriptor> = slots.into_iter().map(|(_, book)| book).collect();
    log_results(&books);
    progress.finish();
    server.close();
    books
}

fn log_results(books: &[BookDescriptor]) {
    let urls = |good: bool| {
        books
            .iter()
            .filter(|b| b.good == good)
            .map(|b| b.url.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };
    info!("\nSuccessful:\n{}\n", urls(true));
    info!("\nUnsuccessful:\n{}\n", urls(false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::CollisionPolicy;
    use crate::third_party::testing::{Failure, MockLibrary};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn batch(dir: &tempfile::TempDir, urls: &[(&str, bool)]) -> Vec<BookDescriptor> {
        urls.iter()
            .enumerate()
            .map(|(i, (url, good))| {
                let mut b = BookDescriptor::new(*url);
                b.good = *good;
                b.calibre_id = Some(i as i64 + 1);
                b.title = format!("Story {i}");
                b.outfile = dir.path().join(format!("{i}.epub"));
                b
            })
            .collect()
    }

    fn recorder() -> (Arc<Mutex<Vec<(f64, String)>>>, ProgressCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ProgressCallback =
            Box::new(move |f: f64, msg: &str| sink.lock().unwrap().push((f, msg.to_string())));
        (seen, cb)
    }

    fn options() -> DownloadOptions {
        DownloadOptions {
            collision: CollisionPolicy::AddNew,
            version: Some("4.30.0".to_string()),
            ..DownloadOptions::default()
        }
    }

    #[test]
    fn bad_books_are_never_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let lib = MockLibrary::new(3);
        let books = batch(
            &dir,
            &[
                ("https://example.com/s/1", true),
                ("https://example.com/s/2", false),
                ("https://example.com/s/3", true),
            ],
        );

        let out = do_download_worker(
            books,
            options(),
            WorkerServices::new(Arc::new(lib.clone())),
            2,
            None,
        );
        assert_eq!(out.len(), 3);
        assert_eq!(lib.writes(), 2);
        assert!(!dir.path().join("1.epub").exists());

        let skipped = out.iter().find(|b| b.url.ends_with("/2")).unwrap();
        assert!(!skipped.good);
        assert!(skipped.comment.is_empty());
        // untouched books stay ahead of completed ones
        assert_eq!(out[0].url, "https://example.com/s/2");
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let lib = MockLibrary::new(3);
        let urls: Vec<String> = (0..5).map(|i| format!("https://example.com/s/{i}")).collect();
        let entries: Vec<(&str, bool)> = urls.iter().map(|u| (u.as_str(), true)).collect();
        let (seen, cb) = recorder();

        let out = do_download_worker(
            batch(&dir, &entries),
            options(),
            WorkerServices::new(Arc::new(lib)),
            3,
            Some(cb),
        );
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|b| b.good));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (0.01, "Downloading FanFiction Stories".to_string()));
        assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(seen.last().unwrap(), &(1.0, "5 of 5 stories finished downloading".to_string()));
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn output_length_matches_input_with_failures() {
        let dir = tempfile::tempdir().unwrap();
        let lib = MockLibrary::new(3).with_failure(Failure::FetchError);
        let books = batch(
            &dir,
            &[
                ("https://example.com/s/1", true),
                ("https://example.com/s/2", false),
                ("https://example.com/s/3", true),
            ],
        );
        let input_urls: HashSet<String> = books.iter().map(|b| b.url.clone()).collect();

        let out = do_download_worker(books, options(), WorkerServices::new(Arc::new(lib)), 4, None);
        assert_eq!(out.len(), 3);
        let output_urls: HashSet<String> = out.iter().map(|b| b.url.clone()).collect();
        assert_eq!(input_urls, output_urls);
        for b in out.iter().filter(|b| b.url != "https://example.com/s/2") {
            assert!(!b.good);
            assert_eq!(b.status.as_deref(), Some("Error"));
        }
    }

    #[test]
    fn panicking_task_becomes_failed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let lib = MockLibrary::new(3).with_failure(Failure::FetchPanic);
        let out = do_download_worker(
            batch(&dir, &[("https://example.com/s/1", true)]),
            options(),
            WorkerServices::new(Arc::new(lib)),
            1,
            None,
        );
        assert_eq!(out.len(), 1);
        assert!(!out[0].good);
        assert_eq!(out[0].comment, "adapter bug");
        assert_eq!(out[0].icon.as_deref(), Some(ICON_ERROR));
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let lib = MockLibrary::new(3);
        let (seen, cb) = recorder();
        let out = do_download_worker(
            batch(&dir, &[("https://example.com/s/1", false)]),
            options(),
            WorkerServices::new(Arc::new(lib)),
            2,
            Some(cb),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (0.01, "Downloading FanFiction Stories".to_string()),
                (1.0, "0 of 0 stories finished downloading".to_string()),
            ]
        );
    }
}
