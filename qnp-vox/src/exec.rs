//! 外部工具调用边界.
//!
//! 外部工具 (R 切片脚本, ANTs) 均为阻塞调用, 没有超时; 成功与否只看退出码.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// 一次子进程调用的描述.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// 可执行程序.
    pub program: OsString,
    /// 参数.
    pub args: Vec<OsString>,
    /// 工作目录. `None` 表示继承当前目录.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// 以程序名创建.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// 追加一个参数.
    pub fn arg(mut self, a: impl Into<OsString>) -> Self {
        self.args.push(a.into());
        self
    }

    /// 追加多个参数.
    pub fn args<I, A>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(it.into_iter().map(Into::into));
        self
    }

    /// 设置工作目录.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// 用于日志的命令行文本.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 子进程结束后的结果.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// 退出码. 被信号终止时为 `None`.
    pub code: Option<i32>,
    /// 捕获的标准输出.
    pub stdout: String,
    /// 捕获的标准错误.
    pub stderr: String,
}

impl CommandOutput {
    /// 退出码是否为 0.
    #[inline]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// 外部工具失败.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// 进程无法启动.
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        /// 命令行.
        command: String,
        /// 底层错误.
        source: io::Error,
    },

    /// 进程以非零状态退出.
    #[error("`{command}` exited with status {}", .code.map_or_else(|| "<signal>".to_owned(), |c| c.to_string()))]
    Failed {
        /// 命令行.
        command: String,
        /// 退出码.
        code: Option<i32>,
        /// 捕获的标准输出.
        stdout: String,
        /// 捕获的标准错误.
        stderr: String,
    },
}

/// 子进程执行器. 测试中可替换为脚本化的替身.
pub trait CommandExecutor {
    /// 阻塞执行 `spec`, 直到进程退出. 只有启动失败才返回 `Err`.
    fn execute(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;

    /// 执行并把非零退出码转换为 [`ToolError::Failed`].
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        let out = self.execute(spec).map_err(|source| ToolError::Launch {
            command: spec.display(),
            source,
        })?;
        if out.success() {
            Ok(out)
        } else {
            Err(ToolError::Failed {
                command: spec.display(),
                code: out.code,
                stdout: out.stdout,
                stderr: out.stderr,
            })
        }
    }
}

/// 直接调用操作系统进程的执行器.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        let out = cmd.output()?;
        Ok(CommandOutput {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}
