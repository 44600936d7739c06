//! 程序运行函数.

use std::io;

use anyhow::Context;
use qnp_vox::prelude::*;

use crate::result;
use crate::Cli;

/// 实际运行. 返回 `Ok(false)` 表示阶段失败或输入校验失败.
pub fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = PipelineConfig::open(&cli.config).with_context(|| {
        format!(
            "Failed to initialize pipeline with {}",
            cli.config.display()
        )
    })?;
    for w in config.store().warnings() {
        log::warn!("{w}");
    }
    let subjects = config
        .subjects(cli.subjects.as_deref())
        .context("Invalid subject list")?;
    if subjects.is_empty() {
        log::warn!("No subjects to process, set `subject_list` or pass --subjects");
    }

    let reporter = LogReporter;
    let executor = SystemExecutor;
    let orchestrator = Orchestrator::new(&config, &executor, &reporter);
    let mut out = io::stdout().lock();

    if cli.info {
        result::describe_info_into(
            config.path(),
            config.pipeline_version(),
            &subjects,
            &orchestrator.status(&subjects),
            &mut out,
        )?;
        return Ok(true);
    }

    if cli.validate_only {
        let missing = orchestrator.validate_inputs(&subjects);
        result::describe_validation_into(&missing, &mut out)?;
        return Ok(missing.is_empty());
    }

    let steps = cli
        .steps
        .clone()
        .unwrap_or_else(|| Stage::DEFAULT.to_vec());
    let report = orchestrator.run(
        &subjects,
        &steps,
        RunPolicy {
            force: cli.force,
            dry_run: cli.dry_run,
        },
    );
    result::describe_run_into(&report, &mut out)?;
    Ok(report.success())
}
