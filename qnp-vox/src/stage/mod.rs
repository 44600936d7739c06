//! 流水线阶段. 每个阶段对单个被试的处理由一个 [`SubjectProcedure`] 实现,
//! 断点续跑、dry-run 与结果汇总则统一由 [`StageRunner`] 负责.

mod extract;
mod kernel;
mod mni;
mod runner;
mod slice;
mod transform;
mod upsample;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::anchor::AnchorError;
use crate::annotation::AnnotationError;
use crate::config::PipelineConfig;
use crate::exec::{CommandExecutor, ToolError};
use crate::report::Reporter;
use crate::volume::VolumeError;
use crate::Subject;

pub use runner::StageRunner;

/// 流水线阶段. 声明顺序即执行顺序.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// 人工上采样产物检查.
    Upsample,
    /// R 脚本生成脑切片.
    Slice,
    /// 标注与测量表的提取和拼接.
    Extract,
    /// 锚点平移与立方块盖印.
    Transform,
    /// 高斯平滑.
    Kernel,
    /// ANTs 配准到 MNI 空间. 需显式指定.
    Mni,
}

/// 未知阶段名.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown step `{0}`, expected one of: upsample, slice, extract, transform, kernel, mni")]
pub struct UnknownStage(pub String);

impl Stage {
    /// 全部阶段.
    pub const ALL: [Stage; 6] = [
        Stage::Upsample,
        Stage::Slice,
        Stage::Extract,
        Stage::Transform,
        Stage::Kernel,
        Stage::Mni,
    ];

    /// 未指定 `--steps` 时运行的阶段. 不含 [`Stage::Mni`].
    pub const DEFAULT: [Stage; 5] = [
        Stage::Upsample,
        Stage::Slice,
        Stage::Extract,
        Stage::Transform,
        Stage::Kernel,
    ];

    /// 命令行中使用的名字.
    pub const fn name(self) -> &'static str {
        match self {
            Stage::Upsample => "upsample",
            Stage::Slice => "slice",
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Kernel => "kernel",
            Stage::Mni => "mni",
        }
    }

    /// 输出目录后缀: `output_base/{s}/{s}{suffix}`.
    pub const fn suffix(self) -> &'static str {
        match self {
            Stage::Upsample => "_upsampled",
            Stage::Slice => "_slices",
            Stage::Extract => "_coordinates",
            Stage::Transform => "_transformation",
            Stage::Kernel => "_kernel",
            Stage::Mni => "_mni_registration",
        }
    }

    /// 用于日志的标题.
    pub const fn title(self) -> &'static str {
        match self {
            Stage::Upsample => "Upsampling",
            Stage::Slice => "Brain Slicing",
            Stage::Extract => "Coordinate Extraction",
            Stage::Transform => "Coordinate Transformation",
            Stage::Kernel => "Kernel Application",
            Stage::Mni => "MNI Registration",
        }
    }

    /// 该阶段的单被试处理过程.
    pub(crate) fn procedure(self) -> &'static dyn SubjectProcedure {
        match self {
            Stage::Upsample => &upsample::Upsample,
            Stage::Slice => &slice::Slice,
            Stage::Extract => &extract::Extract,
            Stage::Transform => &transform::Transform,
            Stage::Kernel => &kernel::Kernel,
            Stage::Mni => &mni::Mni,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|st| st.name() == s.trim())
            .ok_or_else(|| UnknownStage(s.to_owned()))
    }
}

/// 单个阶段的执行结果.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// 阶段.
    pub stage: Stage,
    /// 实际尝试处理的被试数 (不含跳过的).
    pub attempted: usize,
    /// 成功的被试数.
    pub succeeded: usize,
    /// 因已有输出而跳过的被试数.
    pub skipped: usize,
}

impl StageOutcome {
    /// 所有尝试处理的被试都成功. 没有需要处理的被试时也视为成功.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.succeeded == self.attempted
    }

    /// 失败的被试数.
    #[inline]
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// 单个被试在某阶段中的失败原因.
#[derive(Debug, thiserror::Error)]
pub enum SubjectError {
    /// 输入文件不存在.
    #[error("{what} not found - {}", .path.display())]
    InputMissing {
        /// 文件描述.
        what: &'static str,
        /// 期望的位置.
        path: PathBuf,
    },

    /// 标注解析失败.
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    /// 锚点缺失或格式错误.
    #[error(transparent)]
    Anchor(#[from] AnchorError),

    /// 体数据读写失败.
    #[error(transparent)]
    Volume(#[from] VolumeError),

    /// 外部工具失败.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// 标注中没有提取到任何坐标.
    #[error("no coordinates extracted from {}", .0.display())]
    NoCoordinates(PathBuf),

    /// 文件系统操作失败.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        /// 相关路径.
        path: PathBuf,
        /// 底层错误.
        source: io::Error,
    },

    /// CSV 读写失败.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// 单个被试处理结果.
pub type SubjectResult<T> = Result<T, SubjectError>;

/// `path` 不存在时返回 [`SubjectError::InputMissing`].
pub(crate) fn require(what: &'static str, path: &Path) -> SubjectResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(SubjectError::InputMissing {
            what,
            path: path.to_owned(),
        })
    }
}

/// 为 I/O 错误附加路径.
pub(crate) fn io_at(path: &Path) -> impl FnOnce(io::Error) -> SubjectError + '_ {
    move |source| SubjectError::Io {
        path: path.to_owned(),
        source,
    }
}

/// 阶段处理过程可以使用的协作者.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    /// 配置.
    pub config: &'a PipelineConfig,
    /// 外部工具执行器.
    pub executor: &'a dyn CommandExecutor,
    /// 日志.
    pub reporter: &'a dyn Reporter,
}

impl<'a> StageContext<'a> {
    /// 创建.
    #[inline]
    pub fn new(
        config: &'a PipelineConfig,
        executor: &'a dyn CommandExecutor,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            config,
            executor,
            reporter,
        }
    }

    /// `s` 在 `stage` 的输出目录.
    #[inline]
    pub fn stage_dir(&self, s: Subject, stage: Stage) -> PathBuf {
        self.config.subject_stage_dir(s, stage)
    }

    /// 以 `Subject {s}: ` 为前缀记录信息.
    #[inline]
    pub(crate) fn info(&self, s: Subject, msg: impl fmt::Display) {
        self.reporter.info(&format!("Subject {s}: {msg}"));
    }

    /// 以 `Subject {s}: ` 为前缀记录调试信息.
    #[inline]
    pub(crate) fn debug(&self, s: Subject, msg: impl fmt::Display) {
        self.reporter.debug(&format!("Subject {s}: {msg}"));
    }

    /// 以 `Subject {s}: ` 为前缀记录警告.
    #[inline]
    pub(crate) fn warn(&self, s: Subject, msg: impl fmt::Display) {
        self.reporter.warn(&format!("Subject {s}: {msg}"));
    }

    /// 以 `Subject {s}: ` 为前缀记录错误.
    #[inline]
    pub(crate) fn error(&self, s: Subject, msg: impl fmt::Display) {
        self.reporter.error(&format!("Subject {s}: {msg}"));
    }
}

/// 某阶段对单个被试的处理.
pub trait SubjectProcedure {
    /// 所属阶段.
    fn stage(&self) -> Stage;

    /// dry-run 时输出的描述. 不得访问文件系统或外部工具.
    fn describe(&self, ctx: &StageContext<'_>, s: Subject) -> String;

    /// 处理被试 `s`. 输出目录已由调用方创建.
    fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! 各阶段测试共用的替身与夹具.

    use std::cell::RefCell;
    use std::io;
    use std::path::Path;

    use crate::config::{ConfigStore, PipelineConfig};
    use crate::exec::{CommandExecutor, CommandOutput, CommandSpec};

    /// 以 `output_base`, `work_dir` 等均位于 `root` 下的配置.
    pub fn config_in(root: &Path, extra: &[(&str, String)]) -> PipelineConfig {
        let mut store = ConfigStore::default();
        store.set("output_base", root.join("output").to_string_lossy());
        store.set("work_dir", root.join("work").to_string_lossy());
        store.set(
            "input_halo_annotations",
            root.join("annotations").to_string_lossy(),
        );
        store.set(
            "summary_analysis_csv",
            root.join("summary.csv").to_string_lossy(),
        );
        store.set(
            "manual_coordinates_file",
            root.join("manual_coordinates.txt").to_string_lossy(),
        );
        for (k, v) in extra {
            store.set(*k, v.as_str());
        }
        PipelineConfig::from_store(root.join("pipeline_config.txt"), store)
    }

    /// 记录每次调用, 并通过回调模拟外部工具的副作用.
    pub struct FakeExecutor<F: Fn(&CommandSpec) -> CommandOutput> {
        pub calls: RefCell<Vec<CommandSpec>>,
        pub behave: F,
    }

    impl<F: Fn(&CommandSpec) -> CommandOutput> FakeExecutor<F> {
        pub fn new(behave: F) -> Self {
            Self {
                calls: RefCell::default(),
                behave,
            }
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|c| c.program.to_string_lossy().into_owned())
                .collect()
        }
    }

    impl<F: Fn(&CommandSpec) -> CommandOutput> CommandExecutor for FakeExecutor<F> {
        fn execute(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
            self.calls.borrow_mut().push(spec.clone());
            Ok((self.behave)(spec))
        }
    }

    /// 总是成功且没有副作用.
    pub fn ok_output(_: &CommandSpec) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            ..CommandOutput::default()
        }
    }
}
