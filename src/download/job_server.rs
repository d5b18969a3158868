//! 有界工作线程池（job server）。
//!
//! 每个工作线程一次只执行一个任务；任务的通知与完成事件统一投递到同一个变更队列，
//! 调度方只需阻塞读取该队列。任务内的日志被单独捕获，随完成事件一并返回。

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel as channel;
use tracing::{debug, warn};

use crate::base_system::logging::capture_job_log;

pub type JobId = u64;

/// 任务的 panic 信息（正常任务不会产生）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
}

#[derive(Debug)]
pub enum JobEvent<T> {
    /// Progress from inside a still-running job.
    Notification {
        job: JobId,
        fraction: f64,
        message: String,
    },
    Finished {
        job: JobId,
        result: Result<T, JobFailure>,
        details: String,
    },
}

/// Handle given to a running job for reporting its own progress.
pub struct JobNotifier<T> {
    job: JobId,
    tx: channel::Sender<JobEvent<T>>,
}

impl<T> JobNotifier<T> {
    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn notify(&self, fraction: f64, message: &str) {
        let _ = self.tx.send(JobEvent::Notification {
            job: self.job,
            fraction,
            message: message.to_string(),
        });
    }
}

type Task<T> = Box<dyn FnOnce(&JobNotifier<T>) -> T + Send>;

pub struct ParallelJob<T> {
    pub description: String,
    task: Task<T>,
}

impl<T> ParallelJob<T> {
    pub fn new<F>(description: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(&JobNotifier<T>) -> T + Send + 'static,
    {
        Self {
            description: description.into(),
            task: Box::new(task),
        }
    }
}

pub struct JobServer<T> {
    tx: Option<channel::Sender<(JobId, ParallelJob<T>)>>,
    changed_rx: channel::Receiver<JobEvent<T>>,
    handles: Vec<thread::JoinHandle<()>>,
    next_id: JobId,
}

impl<T: Send + 'static> JobServer<T> {
    pub fn new(pool_size: usize) -> Self {
        let workers = pool_size.max(1);
        let (tx, rx) = channel::unbounded::<(JobId, ParallelJob<T>)>();
        let (changed_tx, changed_rx) = channel::unbounded::<JobEvent<T>>();

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx = rx.clone();
            let changed_tx = changed_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("job-worker-{idx}"))
                .spawn(move || worker_loop(rx, changed_tx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!(target: "jobs", "failed to spawn worker {idx}: {err}"),
            }
        }

        Self {
            tx: Some(tx),
            changed_rx,
            handles,
            next_id: 0,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.handles.len()
    }

    pub fn add_job(&mut self, job: ParallelJob<T>) -> JobId {
        self.next_id += 1;
        let id = self.next_id;
        debug!(target: "jobs", job = id, description = %job.description, "queue job");
        if let Some(tx) = &self.tx {
            let _ = tx.send((id, job));
        }
        id
    }

    /// Notifications and completions of every job, in arrival order.
    pub fn changed_jobs(&self) -> &channel::Receiver<JobEvent<T>> {
        &self.changed_rx
    }

    /// 停止接收新任务并等待所有工作线程退出（已排队的任务仍会执行完）。
    pub fn close(&mut self) {
        self.tx.take();
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl<T> Drop for JobServer<T> {
    fn drop(&mut self) {
        self.tx.take();
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

fn worker_loop<T>(
    rx: channel::Receiver<(JobId, ParallelJob<T>)>,
    changed_tx: channel::Sender<JobEvent<T>>,
) {
    for (job, parallel_job) in rx.iter() {
        let notifier = JobNotifier {
            job,
            tx: changed_tx.clone(),
        };
        let task = parallel_job.task;
        let (outcome, details) = capture_job_log(|| {
            panic::catch_unwind(AssertUnwindSafe(|| task(&notifier)))
        });
        let result = outcome.map_err(|payload| JobFailure {
            message: panic_message(payload.as_ref()),
        });
        if changed_tx
            .send(JobEvent::Finished {
                job,
                result,
                details,
            })
            .is_err()
        {
            return;
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
