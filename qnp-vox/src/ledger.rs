//! 断点续跑账本. 以阶段输出目录是否非空作为唯一的 "已完成" 信号,
//! 不比较内容, 也不计算哈希.

use std::fs;

use crate::config::PipelineConfig;
use crate::stage::Stage;
use crate::Subject;

/// 基于文件系统的阶段完成状态查询.
#[derive(Debug, Clone, Copy)]
pub struct OutputLedger<'a> {
    config: &'a PipelineConfig,
}

impl<'a> OutputLedger<'a> {
    /// 创建.
    #[inline]
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// `s` 在 `stage` 的输出目录存在且至少包含一个条目.
    pub fn exists(&self, s: Subject, stage: Stage) -> bool {
        fs::read_dir(self.config.subject_stage_dir(s, stage))
            .map(|mut it| it.next().is_some())
            .unwrap_or(false)
    }

    /// 将 `subjects` 分为 (跳过, 运行) 两部分, 均保持原有顺序.
    /// `force` 为真时不跳过任何被试.
    pub fn partition(
        &self,
        subjects: &[Subject],
        stage: Stage,
        force: bool,
    ) -> (Vec<Subject>, Vec<Subject>) {
        if force {
            return (Vec::new(), subjects.to_vec());
        }
        subjects.iter().partition(|s| self.exists(**s, stage))
    }

    /// 已完成 `stage` 的被试个数.
    pub fn completed(&self, subjects: &[Subject], stage: Stage) -> usize {
        subjects.iter().filter(|s| self.exists(**s, stage)).count()
    }
}
