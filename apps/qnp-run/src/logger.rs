//! 同时写终端与日志文件的 logger.
//!
//! 终端输出交给 [`SimpleLogger`], 文件以追加方式写入, 每次运行的逐被试细节都留在磁盘上.

use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use simple_logger::SimpleLogger;

/// 终端 + 文件.
pub struct TeeLogger {
    console: SimpleLogger,
    file: Option<Mutex<LineWriter<File>>>,
}

impl TeeLogger {
    /// 只写终端.
    pub fn new(level: LevelFilter) -> Self {
        Self {
            console: SimpleLogger::new().with_level(level),
            file: None,
        }
    }

    /// 追加写入 `path`, 必要时创建其父目录.
    pub fn with_file(mut self, path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.file = Some(Mutex::new(LineWriter::new(file)));
        Ok(self)
    }

    /// 安装为全局 logger.
    pub fn init(self) -> Result<(), SetLoggerError> {
        log::set_max_level(self.console.max_level());
        log::set_boxed_logger(Box::new(self))
    }
}

fn file_line(record: &Record<'_>) -> String {
    format!(
        "{} - {} - {} - {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
        record.target(),
        record.level(),
        record.args()
    )
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.console.log(record);
        if let Some(Ok(mut f)) = self.file.as_ref().map(Mutex::lock) {
            // 写日志失败时无处可报, 忽略.
            let _ = writeln!(f, "{}", file_line(record));
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(Ok(mut f)) = self.file.as_ref().map(Mutex::lock) {
            let _ = f.flush();
        }
    }
}
