//! 调用 R 脚本生成脑切片.
//!
//! 脚本约定: 工作目录下 `{s}X/{s}_001_up_re.nii.gz` 为输入, 输出写到 `{s}_slices/*.png`.
//! 两个临时目录在结束后都会被清理, PNG 移动到阶段输出目录.

use std::fs;
use std::path::{Path, PathBuf};

use super::{io_at, require, Stage, StageContext, SubjectProcedure, SubjectResult};
use crate::consts::files;
use crate::exec::CommandSpec;
use crate::Subject;

pub(crate) struct Slice;

impl Slice {
    /// 脚本读取的临时输入目录.
    fn scratch_input(work: &Path, s: Subject) -> PathBuf {
        work.join(format!("{s}X"))
    }

    /// 脚本写出的临时输出目录.
    fn scratch_output(work: &Path, s: Subject) -> PathBuf {
        work.join(format!("{s}_slices"))
    }

    /// 把 `from` 下的 PNG 移到 `to`, 返回移动的个数.
    fn collect_png(from: &Path, to: &Path) -> SubjectResult<usize> {
        let mut moved = 0;
        for entry in fs::read_dir(from).map_err(io_at(from))? {
            let src = entry.map_err(io_at(from))?.path();
            if src.extension().map_or(true, |e| e != "png") {
                continue;
            }
            let Some(name) = src.file_name() else {
                continue;
            };
            let dst = to.join(name);
            if fs::rename(&src, &dst).is_err() {
                // 跨文件系统时退化为复制后删除.
                fs::copy(&src, &dst).map_err(io_at(&dst))?;
                fs::remove_file(&src).map_err(io_at(&src))?;
            }
            moved += 1;
        }
        Ok(moved)
    }
}

impl SubjectProcedure for Slice {
    fn stage(&self) -> Stage {
        Stage::Slice
    }

    fn describe(&self, ctx: &StageContext<'_>, s: Subject) -> String {
        format!(
            "Would generate slices for {} to {}",
            ctx.stage_dir(s, Stage::Upsample)
                .join(files::upsampled(s))
                .display(),
            ctx.stage_dir(s, Stage::Slice).display()
        )
    }

    fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()> {
        let input = ctx.stage_dir(s, Stage::Upsample).join(files::upsampled(s));
        require("upsampled NIfTI file", &input)?;
        let out_dir = ctx.stage_dir(s, Stage::Slice);

        let work = ctx.config.work_dir();
        let scratch = Self::scratch_input(&work, s);
        fs::create_dir_all(&scratch).map_err(io_at(&scratch))?;
        let staged = scratch.join(files::upsampled(s));
        fs::copy(&input, &staged).map_err(io_at(&staged))?;

        let spec = CommandSpec::new("Rscript")
            .arg(ctx.config.slicer_script())
            .arg(s.to_string())
            .current_dir(&work);
        ctx.debug(s, format_args!("Command: {}", spec.display()));
        let result = ctx.executor.run_checked(&spec);

        match fs::remove_dir_all(&scratch) {
            Ok(()) => ctx.debug(
                s,
                format_args!("Cleaned up temporary directory {}", scratch.display()),
            ),
            Err(e) => ctx.warn(
                s,
                format_args!(
                    "Failed to clean up temporary directory {}: {e}",
                    scratch.display()
                ),
            ),
        }
        let output = result?;
        if !output.stdout.trim().is_empty() {
            ctx.debug(s, format_args!("R output: {}", output.stdout.trim()));
        }

        let slices = Self::scratch_output(&work, s);
        if !slices.is_dir() {
            ctx.warn(
                s,
                format_args!("R script produced no slice directory {}", slices.display()),
            );
            return Ok(());
        }
        let moved = Self::collect_png(&slices, &out_dir)?;
        if let Err(e) = fs::remove_dir(&slices) {
            ctx.warn(
                s,
                format_args!("Failed to remove {}: {e}", slices.display()),
            );
        }
        ctx.info(
            s,
            format_args!("Generated {moved} slices in {}", out_dir.display()),
        );
        Ok(())
    }
}
