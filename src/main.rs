//! fanfic-jobs 命令行入口。
//!
//! 负责：解析参数、加载 `fanfic-jobs.yml`、初始化日志，然后分派到 `ui::noui` 的处理函数。

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;

use fanfic_jobs::base_system::config::{load_or_create, load_or_create_with_base};
use fanfic_jobs::base_system::context::Config;
use fanfic_jobs::base_system::logging::{LogOptions, LogSystem};
use fanfic_jobs::ui::noui::{self, PrefsAction};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "fanfic-jobs")]
#[command(version, about = "FanFicFare library jobs: plugin settings and EPUB inspection")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 fanfic-jobs.yml 和 logs 等文件）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 查看或修改书库中的插件设置
    Prefs {
        /// 书库目录；缺省时使用配置中的 library_path
        #[arg(long)]
        library: Option<PathBuf>,

        #[command(subcommand)]
        action: PrefsAction,
    },
    /// 显示已有 EPUB 中可用于更新的数据
    Inspect { epub: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.as_deref();

    let config = if let Some(dir) = data_dir {
        load_or_create_with_base::<Config>(None, Some(dir)).map_err(|e| anyhow!(e.to_string()))?
    } else {
        load_or_create::<Config>(None).map_err(|e| anyhow!(e.to_string()))?
    };

    let _log = init_logging(cli.debug, &config, data_dir)?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    match &cli.command {
        Command::Prefs { library, action } => {
            let base = data_dir.unwrap_or(Path::new("."));
            let library_dir = library
                .clone()
                .unwrap_or_else(|| config.library_dir(base));
            noui::run_prefs(&library_dir, action)
        }
        Command::Inspect { epub } => noui::run_inspect(epub),
    }
}

fn init_logging(debug: bool, config: &Config, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: config.archive_logs,
        console: config.console_log,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
