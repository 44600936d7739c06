#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 将 Halo 导出的病理切片标注 (QNP, Quantitative Neuropathology)
//! 按被试转换为空间配准的 3D 密度体数据, 并提供可断点续跑的多阶段流水线.
//!
//! # 注意
//!
//! 1. 流水线严格串行: 阶段之间按声明顺序执行, 阶段内部按给定顺序处理被试.
//! 2. 单个被试的失败不会中断同一阶段内的其他被试, 但会使该阶段失败,
//!   进而使 [`Orchestrator`] 停止后续所有阶段.
//! 3. 外部工具 (R 切片脚本, ANTs 配准) 仅通过 [`CommandExecutor`] 以子进程形式调用,
//!   成功与否完全由退出码决定.
//!
//! # 阶段
//!
//! ### upsample ✅
//!
//! 人工在 FSLeyes 中完成上采样和重定向, 本库只检查产物 `{s}_001_up_re.nii.gz` 是否存在.
//!
//! ### slice ✅
//!
//! 调用 R 脚本生成脑切片 PNG.
//!
//! ### extract ✅
//!
//! 解析 Halo 标注 XML 与 Summary Analysis 表, 按位置对应关系拼接成 tile 记录.
//!
//! 实现位于 `qnp-vox/src/annotation.rs`.
//!
//! ### transform ✅
//!
//! 根据人工锚点把 tile 记录放置到参考体数据的体素网格中, 逐 tile 盖印立方块.
//!
//! 实现位于 `qnp-vox/src/volume.rs`.
//!
//! ### kernel ✅
//!
//! 对人工对齐后的块体数据做 2mm 高斯平滑与阈值掩膜.
//!
//! 实现位于 `qnp-vox/src/smooth.rs`.
//!
//! ### mni ⌛️
//!
//! 依赖 ANTs, 默认不执行, 需显式指定.

/// 三维体素索引, 按 nifti 的 `(x, y, z)` 顺序.
pub type Idx3d = (usize, usize, usize);

/// 被试编号.
pub type Subject = u32;

pub mod anchor;
pub mod annotation;
pub mod config;
pub mod consts;
pub mod exec;
pub mod ledger;
pub mod orchestrator;
pub mod prelude;
pub mod report;
pub mod smooth;
pub mod stage;
pub mod volume;

pub use anchor::{AnchorError, ManualAnchor};
pub use annotation::{AnnotationError, Coordinate, Measurement, TileRecord};
pub use config::{ConfigError, ConfigStore, PipelineConfig};
pub use exec::{CommandExecutor, CommandOutput, CommandSpec, SystemExecutor, ToolError};
pub use ledger::OutputLedger;
pub use orchestrator::{MissingInput, Orchestrator, RunPolicy, RunReport, RunState, StageStatus};
pub use report::{LogReporter, MemoryReporter, Reporter};
pub use stage::{
    Stage, StageContext, StageOutcome, StageRunner, SubjectError, SubjectProcedure, SubjectResult,
};
pub use volume::{DensityVolume, ReferenceGrid, TransformedTile, VolumeError, VolumeHeaderAttr};
