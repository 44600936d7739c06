//! 日志/报告能力. 由调用方注入给 [`Orchestrator`](crate::Orchestrator) 和
//! [`StageRunner`](crate::StageRunner), 库内部不依赖全局日志配置.

use std::cell::RefCell;

use log::Level;

/// 日志接收方.
pub trait Reporter {
    /// 记录一条消息.
    fn report(&self, level: Level, message: &str);

    /// 调试信息.
    #[inline]
    fn debug(&self, message: &str) {
        self.report(Level::Debug, message);
    }

    /// 普通信息.
    #[inline]
    fn info(&self, message: &str) {
        self.report(Level::Info, message);
    }

    /// 警告.
    #[inline]
    fn warn(&self, message: &str) {
        self.report(Level::Warn, message);
    }

    /// 错误.
    #[inline]
    fn error(&self, message: &str) {
        self.report(Level::Error, message);
    }
}

/// 转发到 `log` 门面的报告器. 具体后端由可执行程序初始化.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    #[inline]
    fn report(&self, level: Level, message: &str) {
        log::log!(target: "qnp_vox", level, "{message}");
    }
}

/// 把所有消息按顺序记在内存里. 主要用于测试.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: RefCell<Vec<(Level, String)>>,
}

impl MemoryReporter {
    /// 创建空报告器.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的全部消息.
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.borrow().clone()
    }

    /// 是否存在包含 `needle` 的消息.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|(_, l)| l.contains(needle))
    }

    /// 指定级别的消息数.
    pub fn count(&self, level: Level) -> usize {
        self.lines.borrow().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, level: Level, message: &str) {
        self.lines.borrow_mut().push((level, message.to_owned()));
    }
}
