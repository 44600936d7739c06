//! ANTs 配准: 先把上采样脑配准到 MNI 模板, 再把平滑块变换到 MNI 空间.
//!
//! 两步都以已有产物为准跳过, 因此可以在中途失败后重新执行.

use std::fs;
use std::path::{Path, PathBuf};

use super::{io_at, require, Stage, StageContext, SubjectProcedure, SubjectResult};
use crate::consts::files;
use crate::exec::CommandSpec;
use crate::Subject;

pub(crate) struct Mni;

/// 外部工具在输出目录中运行, 所以传给它们的路径必须是绝对路径.
fn absolute(p: &Path) -> SubjectResult<PathBuf> {
    fs::canonicalize(p).map_err(io_at(p))
}

impl Mni {
    fn register(
        ctx: &StageContext<'_>,
        s: Subject,
        native: &Path,
        template: &Path,
        out_dir: &Path,
    ) -> SubjectResult<()> {
        let affine = out_dir.join(files::generic_affine(s));
        let warp = out_dir.join(files::warp(s));
        if affine.exists() && warp.exists() {
            ctx.info(s, "Transformation files already exist");
            return Ok(());
        }
        let spec = CommandSpec::new("antsRegistrationSyN.sh")
            .args(["-d", "3", "-f"])
            .arg(template)
            .arg("-m")
            .arg(native)
            .arg("-o")
            .arg(out_dir.join(files::registration_prefix(s)))
            .args(["-n", "4"])
            .current_dir(out_dir);
        ctx.info(s, "Running ANTs registration...");
        ctx.debug(s, format_args!("Command: {}", spec.display()));
        ctx.executor.run_checked(&spec)?;
        ctx.info(s, "ANTs registration completed successfully");
        Ok(())
    }

    fn apply(
        ctx: &StageContext<'_>,
        s: Subject,
        kernel_block: &Path,
        template: &Path,
        out_dir: &Path,
    ) -> SubjectResult<()> {
        let output = out_dir.join(files::to_mni(s));
        if output.exists() {
            ctx.info(s, "Transformed kernel block already exists");
            return Ok(());
        }
        let affine = out_dir.join(files::generic_affine(s));
        let warp = out_dir.join(files::warp(s));
        require("forward transform", &affine)?;
        require("warp transform", &warp)?;

        let spec = CommandSpec::new("antsApplyTransforms")
            .args(["-d", "3", "-i"])
            .arg(kernel_block)
            .arg("-r")
            .arg(template)
            .arg("-o")
            .arg(&output)
            .args(["-n", "NearestNeighbor", "-t"])
            .arg(&warp)
            .arg("-t")
            .arg(&affine)
            .current_dir(out_dir);
        ctx.info(s, "Applying ANTs transforms to kernel block...");
        ctx.debug(s, format_args!("Command: {}", spec.display()));
        ctx.executor.run_checked(&spec)?;
        ctx.info(s, "Kernel block transformed to MNI space successfully");
        Ok(())
    }
}

impl SubjectProcedure for Mni {
    fn stage(&self) -> Stage {
        Stage::Mni
    }

    fn describe(&self, ctx: &StageContext<'_>, s: Subject) -> String {
        format!(
            "Would register to MNI -> {}",
            ctx.stage_dir(s, Stage::Mni).display()
        )
    }

    fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()> {
        let native = ctx.stage_dir(s, Stage::Upsample).join(files::upsampled(s));
        let kernel_block = ctx.stage_dir(s, Stage::Kernel).join(files::smoothed(s));
        let template = ctx.config.mni_template_path();
        require("native brain file", &native)?;
        require("kernel block file", &kernel_block)?;
        require("MNI template", &template)?;

        let out_dir = absolute(&ctx.stage_dir(s, Stage::Mni))?;
        let native = absolute(&native)?;
        let kernel_block = absolute(&kernel_block)?;
        let template = absolute(&template)?;

        Self::register(ctx, s, &native, &template, &out_dir)?;
        Self::apply(ctx, s, &kernel_block, &template, &out_dir)?;
        ctx.info(s, "MNI registration completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::report::MemoryReporter;
    use crate::stage::testing::{config_in, ok_output, FakeExecutor};
    use crate::stage::{StageRunner, SubjectError};

    fn is_missing(r: &SubjectResult<()>) -> bool {
        matches!(r, Err(SubjectError::InputMissing { .. }))
    }

    /// 按命令模拟 ANTs 写出的产物.
    fn fake_ants(spec: &CommandSpec) -> CommandOutput {
        let cwd = spec.cwd.clone().unwrap();
        let prog = spec.program.to_string_lossy().into_owned();
        let args: Vec<String> = spec
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        if prog == "antsRegistrationSyN.sh" {
            let prefix = &args[args.iter().position(|a| a == "-o").unwrap() + 1];
            fs::write(format!("{prefix}0GenericAffine.mat"), b"mat").unwrap();
            fs::write(format!("{prefix}1Warp.nii.gz"), b"warp").unwrap();
        } else {
            let out = &args[args.iter().position(|a| a == "-o").unwrap() + 1];
            assert!(Path::new(out).starts_with(&cwd));
            fs::write(out, b"mni").unwrap();
        }
        CommandOutput {
            code: Some(0),
            ..CommandOutput::default()
        }
    }

    fn seed(root: &Path, cfg: &crate::PipelineConfig, s: Subject) {
        for (stage, name) in [
            (Stage::Upsample, files::upsampled(s)),
            (Stage::Kernel, files::smoothed(s)),
        ] {
            let dir = cfg.subject_stage_dir(s, stage);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(name), b"nii").unwrap();
        }
        fs::write(root.join("mni.nii.gz"), b"nii").unwrap();
    }

    #[test]
    fn test_registers_then_applies_once() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("mni.nii.gz").to_string_lossy().into_owned();
        let cfg = config_in(tmp.path(), &[("mni_template_path", template)]);
        seed(tmp.path(), &cfg, 9);
        let exec = FakeExecutor::new(fake_ants);
        let rep = MemoryReporter::new();
        let ctx = StageContext::new(&cfg, &exec, &rep);

        let out = StageRunner::new(Stage::Mni, ctx).run(&[9], false, false);
        assert!(out.is_success());
        let mni_dir = cfg.subject_stage_dir(9, Stage::Mni);
        assert!(mni_dir.join("9_0GenericAffine.mat").is_file());
        assert!(mni_dir.join("9_1Warp.nii.gz").is_file());
        assert_eq!(
            exec.programs(),
            vec!["antsRegistrationSyN.sh", "antsApplyTransforms"]
        );
        assert!(cfg
            .subject_stage_dir(9, Stage::Mni)
            .join(files::to_mni(9))
            .is_file());

        // 强制重跑时, 已有的变换与产物都不再重复计算.
        StageRunner::new(Stage::Mni, ctx).run(&[9], true, false);
        assert_eq!(exec.calls.borrow().len(), 2);
    }

    #[test]
    fn test_missing_template_fails_before_any_tool() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("absent.nii.gz").to_string_lossy().into_owned();
        let cfg = config_in(tmp.path(), &[("mni_template_path", template)]);
        seed(tmp.path(), &cfg, 9);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let ctx = StageContext::new(&cfg, &exec, &rep);
        fs::create_dir_all(ctx.stage_dir(9, Stage::Mni)).unwrap();

        assert!(is_missing(&Mni.process(&ctx, 9)));
        assert!(exec.calls.borrow().is_empty());
    }

    #[test]
    fn test_registration_without_outputs_fails_apply() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("mni.nii.gz").to_string_lossy().into_owned();
        let cfg = config_in(tmp.path(), &[("mni_template_path", template)]);
        seed(tmp.path(), &cfg, 9);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let ctx = StageContext::new(&cfg, &exec, &rep);
        fs::create_dir_all(ctx.stage_dir(9, Stage::Mni)).unwrap();

        assert!(is_missing(&Mni.process(&ctx, 9)));
        assert_eq!(exec.programs(), vec!["antsRegistrationSyN.sh"]);
    }
}
