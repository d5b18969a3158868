//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`：数据模型（BookDescriptor / DownloadOptions / CollisionPolicy 等）
//! - `progress`：进度上报与 CLI 进度条
//! - `job_server`：有界工作线程池与完成队列
//! - `worker`：单本书的下载任务
//! - `downloader`：批量下载编排

pub mod downloader;
pub mod job_server;
pub mod models;
pub mod progress;
pub mod worker;

pub use downloader::do_download_worker;
pub use models::{BookDescriptor, CollisionPolicy, DownloadOptions, OutputFormat};
pub use worker::{WorkerServices, do_download_for_worker, inject_cal_cols};
