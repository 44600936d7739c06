//! 多阶段流水线的总控.

use std::path::PathBuf;

use itertools::Itertools;

use crate::config::PipelineConfig;
use crate::exec::CommandExecutor;
use crate::ledger::OutputLedger;
use crate::report::Reporter;
use crate::stage::{Stage, StageContext, StageOutcome, StageRunner};
use crate::Subject;

/// 运行策略.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunPolicy {
    /// 忽略已有输出, 全部重跑.
    pub force: bool,
    /// 只描述将要做的事, 不写文件, 不调用外部工具.
    pub dry_run: bool,
}

/// 流水线状态.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// 尚未开始.
    NotStarted,
    /// 正在执行某阶段.
    Running(Stage),
    /// 在某阶段失败, 后续阶段不再执行.
    Failed(Stage),
    /// 全部阶段成功.
    Completed,
}

/// 一次运行的结果.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// 终止状态.
    pub state: RunState,
    /// 已执行阶段的结果, 按执行顺序.
    pub outcomes: Vec<StageOutcome>,
}

impl RunReport {
    /// 是否全部成功.
    #[inline]
    pub fn success(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// 单个阶段的完成情况, 用于 `--info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageStatus {
    /// 阶段.
    pub stage: Stage,
    /// 已有输出的被试数.
    pub completed: usize,
    /// 被试总数.
    pub total: usize,
}

/// 缺失的输入文件.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    /// 被试.
    pub subject: Subject,
    /// 文件描述.
    pub what: &'static str,
    /// 期望的位置.
    pub path: PathBuf,
}

/// 依次执行阶段, 首个失败阶段之后全部停止.
pub struct Orchestrator<'a> {
    config: &'a PipelineConfig,
    executor: &'a dyn CommandExecutor,
    reporter: &'a dyn Reporter,
}

impl<'a> Orchestrator<'a> {
    /// 创建.
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

    #[inline]
    fn context(&self) -> StageContext<'a> {
        StageContext::new(self.config, self.executor, self.reporter)
    }

    /// 对 `subjects` 执行 `stages`. 阶段按给定顺序执行, 重复的阶段只保留第一次.
    pub fn run(&self, subjects: &[Subject], stages: &[Stage], policy: RunPolicy) -> RunReport {
        let rep = self.reporter;
        let stages: Vec<Stage> = stages.iter().copied().unique().collect();
        if stages.contains(&Stage::Mni) {
            rep.warn("MNI registration requires ANTs (antsRegistrationSyN.sh, antsApplyTransforms)");
            rep.warn("Make sure ANTs is installed and on PATH before running the mni step");
        }

        rep.info("Starting QNP to voxel pipeline");
        rep.info(&format!("Subjects: {}", subjects.iter().join(", ")));
        rep.info(&format!("Steps: {}", stages.iter().join(", ")));
        if policy.dry_run {
            rep.info("=== DRY RUN MODE ===");
        }

        let mut report = RunReport {
            state: RunState::NotStarted,
            outcomes: Vec::with_capacity(stages.len()),
        };
        for &stage in &stages {
            report.state = RunState::Running(stage);
            rep.info(&format!("=== STEP: {} ===", stage.name().to_uppercase()));
            rep.info(&format!("Running {}", stage.title()));

            let outcome =
                StageRunner::new(stage, self.context()).run(subjects, policy.force, policy.dry_run);
            report.outcomes.push(outcome);
            if !outcome.is_success() {
                rep.error(&format!("Step '{stage}' failed"));
                report.state = RunState::Failed(stage);
                break;
            }
        }

        if let RunState::Failed(_) = report.state {
            rep.error("Pipeline failed. Check logs for details.");
        } else {
            report.state = RunState::Completed;
            rep.info("Pipeline completed successfully!");
        }
        report
    }

    /// 各阶段的完成情况.
    pub fn status(&self, subjects: &[Subject]) -> Vec<StageStatus> {
        let ledger = OutputLedger::new(self.config);
        Stage::ALL
            .into_iter()
            .map(|stage| StageStatus {
                stage,
                completed: ledger.completed(subjects, stage),
                total: subjects.len(),
            })
            .collect()
    }

    /// 检查每个被试的原始输入 (MGZ 与标注文件).
    pub fn validate_inputs(&self, subjects: &[Subject]) -> Vec<MissingInput> {
        subjects
            .iter()
            .flat_map(|&s| {
                [
                    ("MGZ", self.config.input_mgz_path(s)),
                    ("annotation", self.config.input_annotation_path(s)),
                ]
                .into_iter()
                .filter(|(_, p)| !p.exists())
                .map(move |(what, path)| MissingInput {
                    subject: s,
                    what,
                    path,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::files;
    use crate::report::MemoryReporter;
    use crate::stage::testing::{config_in, ok_output, FakeExecutor};
    use std::fs;

    #[test]
    fn test_extract_failure_halts_before_transform() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();

        let report = Orchestrator::new(&cfg, &exec, &rep).run(
            &[6966],
            &[Stage::Extract, Stage::Transform, Stage::Kernel],
            RunPolicy::default(),
        );
        assert_eq!(report.state, RunState::Failed(Stage::Extract));
        assert_eq!(report.outcomes.len(), 1);
        assert!(!report.success());
        assert!(!rep.contains("=== STEP: TRANSFORM ==="));
        assert!(!cfg.subject_stage_dir(6966, Stage::Transform).exists());
        assert!(rep.contains("Pipeline failed"));
    }

    #[test]
    fn test_dry_run_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();

        let report = Orchestrator::new(&cfg, &exec, &rep).run(
            &[1, 2],
            &Stage::ALL,
            RunPolicy {
                force: false,
                dry_run: true,
            },
        );
        assert!(report.success());
        assert_eq!(report.outcomes.len(), 6);
        assert!(report.outcomes.iter().all(|o| o.attempted == 2));
        assert!(exec.calls.borrow().is_empty());
        assert!(!cfg.output_base().exists());
        assert!(!cfg.work_dir().exists());
        assert!(rep.contains("MNI registration requires ANTs"));
    }

    #[test]
    fn test_stages_run_in_requested_order() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();

        let report = Orchestrator::new(&cfg, &exec, &rep).run(
            &[1],
            &[Stage::Kernel, Stage::Extract, Stage::Kernel],
            RunPolicy {
                force: false,
                dry_run: true,
            },
        );
        let order: Vec<_> = report.outcomes.iter().map(|o| o.stage).collect();
        assert_eq!(order, vec![Stage::Kernel, Stage::Extract]);
        let kernel_at = rep.lines().iter().position(|(_, l)| l == "=== STEP: KERNEL ===");
        let extract_at = rep.lines().iter().position(|(_, l)| l == "=== STEP: EXTRACT ===");
        assert!(kernel_at.is_some() && kernel_at < extract_at);
    }

    #[test]
    fn test_empty_stage_list_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();

        let report = Orchestrator::new(&cfg, &exec, &rep).run(&[1], &[], RunPolicy::default());
        assert_eq!(report.state, RunState::Completed);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn test_status_and_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(
            tmp.path(),
            &[(
                "input_mgz_images",
                tmp.path().join("mgz").to_string_lossy().into_owned(),
            )],
        );
        let up = cfg.subject_stage_dir(1, Stage::Upsample);
        fs::create_dir_all(&up).unwrap();
        fs::write(up.join(files::upsampled(1)), b"nii").unwrap();
        let mgz = cfg.input_mgz_path(2);
        fs::create_dir_all(mgz.parent().unwrap()).unwrap();
        fs::write(&mgz, b"mgz").unwrap();

        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let orch = Orchestrator::new(&cfg, &exec, &rep);

        let status = orch.status(&[1, 2]);
        assert_eq!(status.len(), 6);
        assert_eq!((status[0].completed, status[0].total), (1, 2));
        assert!(status[1..].iter().all(|s| s.completed == 0));

        let missing = orch.validate_inputs(&[1, 2]);
        let described: Vec<_> = missing.iter().map(|m| (m.subject, m.what)).collect();
        assert_eq!(
            described,
            vec![(1, "MGZ"), (1, "annotation"), (2, "annotation")]
        );
    }
}
