//! QNP 体素化流水线命令行入口.
//!
//! ```text
//! qnp-run                                 运行默认阶段 (不含 mni)
//! qnp-run --steps extract transform       只运行指定阶段
//! qnp-run --subjects 6966 7038 --force    只处理指定被试, 覆盖已有输出
//! qnp-run --info                          显示配置与各阶段完成情况
//! qnp-run --validate-only                 只检查原始输入文件
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use qnp_vox::consts::defaults;
use qnp_vox::{PipelineConfig, Stage, Subject};

use crate::logger::TeeLogger;

mod logger;
mod result;
mod runner;

/// QNP to voxel pipeline: Halo annotations -> registered 3D density volumes.
#[derive(Debug, Parser)]
#[command(name = "qnp-run", version, about)]
pub struct Cli {
    /// Show configuration and per-step completion, then exit.
    #[arg(long)]
    pub info: bool,

    /// Only check that the raw input files exist.
    #[arg(long)]
    pub validate_only: bool,

    /// Steps to run, in the given order (default: all except mni).
    #[arg(long, num_args = 1.., value_name = "STEP")]
    pub steps: Option<Vec<Stage>>,

    /// Subjects to process (default: `subject_list` from the configuration).
    #[arg(long, num_args = 1.., value_name = "ID")]
    pub subjects: Option<Vec<Subject>>,

    /// Overwrite existing output.
    #[arg(long)]
    pub force: bool,

    /// Describe what would be done without touching any file.
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file.
    #[arg(long, env = "QNP_PIPELINE_CONFIG", default_value = defaults::CONFIG_PATH)]
    pub config: PathBuf,
}

/// 日志文件位置. 配置文件不可读时使用默认目录, 配置错误随后由 [`runner::run`] 报告.
fn log_file(cli: &Cli) -> PathBuf {
    PipelineConfig::open(&cli.config).map_or_else(
        |_| [defaults::LOGS_DIR, defaults::LOG_FILE].iter().collect(),
        |c| c.log_file(),
    )
}

fn init_logger(verbose: bool, log_file: &Path) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = TeeLogger::new(level);
    let logger = match logger.with_file(log_file) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Cannot open log file {}: {e}", log_file.display());
            TeeLogger::new(level)
        }
    };
    if let Err(e) = logger.init() {
        eprintln!("Logger already initialized: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose, &log_file(&cli));

    let code = match runner::run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    };
    log::logger().flush();
    code
}
