//! 阶段的统一执行过程.

use std::fs;

use itertools::Itertools;

use super::{io_at, Stage, StageContext, StageOutcome, SubjectError, SubjectProcedure};
use crate::exec::ToolError;
use crate::ledger::OutputLedger;
use crate::Subject;

/// 以统一的续跑/执行/汇总流程运行一个阶段.
///
/// 1. 通过 [`OutputLedger`] 剔除已有输出的被试 (`force` 时不剔除);
/// 2. 没有剩余被试时直接成功;
/// 3. 非 dry-run 时为每个被试创建输出目录;
/// 4. 依次处理每个被试. 单个被试失败只记录, 不中断;
/// 5. 汇总为 [`StageOutcome`].
pub struct StageRunner<'a> {
    procedure: &'a dyn SubjectProcedure,
    ctx: StageContext<'a>,
}

impl<'a> StageRunner<'a> {
    /// 运行内置阶段 `stage`.
    #[inline]
    pub fn new(stage: Stage, ctx: StageContext<'a>) -> Self {
        Self::with_procedure(stage.procedure(), ctx)
    }

    /// 运行任意处理过程.
    #[inline]
    pub fn with_procedure(procedure: &'a dyn SubjectProcedure, ctx: StageContext<'a>) -> Self {
        Self { procedure, ctx }
    }

    /// 所属阶段.
    #[inline]
    pub fn stage(&self) -> Stage {
        self.procedure.stage()
    }

    /// 对 `subjects` 执行该阶段.
    pub fn run(&self, subjects: &[Subject], force: bool, dry_run: bool) -> StageOutcome {
        let stage = self.stage();
        let reporter = self.ctx.reporter;
        let (skip, todo) = OutputLedger::new(self.ctx.config).partition(subjects, stage, force);

        if !skip.is_empty() {
            reporter.warn(&format!(
                "Found existing output for {} subjects in step {}, skipping: {}",
                skip.len(),
                stage.suffix(),
                skip.iter().join(", ")
            ));
            reporter.info("Use --force to overwrite existing output");
        }

        let mut outcome = StageOutcome {
            stage,
            attempted: todo.len(),
            succeeded: 0,
            skipped: skip.len(),
        };
        if todo.is_empty() {
            reporter.info("No subjects to process");
            return outcome;
        }

        for &s in &todo {
            if dry_run {
                reporter.info(&format!("DRY RUN: {}", self.procedure.describe(&self.ctx, s)));
                outcome.succeeded += 1;
                continue;
            }
            match self.process_one(s) {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => self.report_failure(s, &e),
            }
        }

        reporter.info(&format!(
            "Step completed: {}/{} subjects successful",
            outcome.succeeded, outcome.attempted
        ));
        outcome
    }

    fn process_one(&self, s: Subject) -> Result<(), SubjectError> {
        let dir = self.ctx.stage_dir(s, self.stage());
        fs::create_dir_all(&dir).map_err(io_at(&dir))?;
        self.procedure.process(&self.ctx, s)
    }

    fn report_failure(&self, s: Subject, e: &SubjectError) {
        self.ctx
            .error(s, format_args!("{} failed - {e}", self.stage().title()));
        if let SubjectError::Tool(ToolError::Failed { stdout, stderr, .. }) = e {
            self.ctx.reporter.error(&format!("stdout: {stdout}"));
            self.ctx.reporter.error(&format!("stderr: {stderr}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::report::MemoryReporter;
    use crate::stage::testing::{config_in, ok_output, FakeExecutor};
    use crate::stage::SubjectResult;
    use std::cell::RefCell;

    /// 把被试写进输出目录; 奇数被试失败.
    struct EvenOnly {
        seen: RefCell<Vec<Subject>>,
    }

    impl SubjectProcedure for EvenOnly {
        fn stage(&self) -> Stage {
            Stage::Extract
        }

        fn describe(&self, _: &StageContext<'_>, s: Subject) -> String {
            format!("would handle {s}")
        }

        fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()> {
            self.seen.borrow_mut().push(s);
            if s % 2 == 1 {
                return Err(SubjectError::NoCoordinates(format!("{s}.xml").into()));
            }
            let p = ctx.stage_dir(s, Stage::Extract).join("done.csv");
            fs::write(&p, b"x").map_err(io_at(&p))
        }
    }

    #[test]
    fn test_failure_does_not_stop_other_subjects() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let proc = EvenOnly {
            seen: RefCell::default(),
        };
        let runner = StageRunner::with_procedure(&proc, StageContext::new(&cfg, &exec, &rep));

        let out = runner.run(&[1, 2, 3, 4], false, false);
        assert_eq!(*proc.seen.borrow(), vec![1, 2, 3, 4]);
        assert_eq!((out.attempted, out.succeeded, out.skipped), (4, 2, 0));
        assert!(!out.is_success());
        assert!(rep.contains("Subject 3: Coordinate Extraction failed - no coordinates"));
        assert!(rep.contains("Step completed: 2/4 subjects successful"));
    }

    #[test]
    fn test_resume_skips_completed_and_force_reruns() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let proc = EvenOnly {
            seen: RefCell::default(),
        };
        let runner = StageRunner::with_procedure(&proc, StageContext::new(&cfg, &exec, &rep));

        assert!(runner.run(&[2, 4], false, false).is_success());
        let again = runner.run(&[2, 4], false, false);
        assert_eq!((again.attempted, again.skipped), (0, 2));
        assert!(again.is_success());
        assert!(rep.contains("Found existing output for 2 subjects in step _coordinates, skipping: 2, 4"));
        assert!(rep.contains("No subjects to process"));
        assert_eq!(proc.seen.borrow().len(), 2);

        let forced = runner.run(&[2, 4], true, false);
        assert_eq!((forced.attempted, forced.skipped), (2, 0));
        assert_eq!(proc.seen.borrow().len(), 4);
    }

    #[test]
    fn test_failed_subject_leaves_empty_dir_and_is_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let proc = EvenOnly {
            seen: RefCell::default(),
        };
        let runner = StageRunner::with_procedure(&proc, StageContext::new(&cfg, &exec, &rep));

        runner.run(&[1], false, false);
        assert!(cfg.subject_stage_dir(1, Stage::Extract).is_dir());
        let again = runner.run(&[1], false, false);
        assert_eq!(again.attempted, 1);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let proc = EvenOnly {
            seen: RefCell::default(),
        };
        let runner = StageRunner::with_procedure(&proc, StageContext::new(&cfg, &exec, &rep));

        let out = runner.run(&[1, 2], false, true);
        assert_eq!((out.attempted, out.succeeded), (2, 2));
        assert!(proc.seen.borrow().is_empty());
        assert!(!cfg.output_base().exists());
        assert!(rep.contains("DRY RUN: would handle 1"));
    }

    #[test]
    fn test_tool_output_is_logged() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        let exec = FakeExecutor::new(|_| CommandOutput {
            code: Some(1),
            stdout: "reading volume".into(),
            stderr: "segfault".into(),
        });
        let rep = MemoryReporter::new();

        struct CallsTool;
        impl SubjectProcedure for CallsTool {
            fn stage(&self) -> Stage {
                Stage::Slice
            }
            fn describe(&self, _: &StageContext<'_>, _: Subject) -> String {
                String::new()
            }
            fn process(&self, ctx: &StageContext<'_>, _: Subject) -> SubjectResult<()> {
                ctx.executor
                    .run_checked(&crate::exec::CommandSpec::new("Rscript"))?;
                Ok(())
            }
        }

        let out = StageRunner::with_procedure(&CallsTool, StageContext::new(&cfg, &exec, &rep))
            .run(&[5], false, false);
        assert_eq!(out.failed(), 1);
        assert!(rep.contains("stdout: reading volume"));
        assert!(rep.contains("stderr: segfault"));
    }
}
