//! 对人工对齐后的块体数据做高斯平滑, 并把低于阈值的体素置零.

use super::{require, Stage, StageContext, SubjectProcedure, SubjectResult};
use crate::consts::files;
use crate::smooth;
use crate::volume::DensityVolume;
use crate::Subject;

pub(crate) struct Kernel;

impl SubjectProcedure for Kernel {
    fn stage(&self) -> Stage {
        Stage::Kernel
    }

    fn describe(&self, ctx: &StageContext<'_>, s: Subject) -> String {
        format!(
            "Would apply kernel to {} -> {}",
            ctx.stage_dir(s, Stage::Transform)
                .join(files::mask_block_aligned(s))
                .display(),
            ctx.stage_dir(s, Stage::Kernel)
                .join(files::smoothed(s))
                .display()
        )
    }

    fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()> {
        let input = ctx
            .stage_dir(s, Stage::Transform)
            .join(files::mask_block_aligned(s));
        let output = ctx.stage_dir(s, Stage::Kernel).join(files::smoothed(s));
        if output.exists() {
            ctx.info(
                s,
                format_args!("Kernel output already exists - {}", output.display()),
            );
            return Ok(());
        }
        if let Err(e) = require("aligned block file", &input) {
            ctx.error(s, "Run the manual alignment step first");
            return Err(e);
        }

        let (header, data) = DensityVolume::open(&input)?.into_parts();
        ctx.debug(s, format_args!("Data shape: {:?}", data.dim()));
        let mut smoothed = smooth::gaussian_filter(data.view(), ctx.config.kernel_sigma());
        let kept = smooth::apply_threshold(&mut smoothed, ctx.config.kernel_threshold());
        DensityVolume::from_parts(header, smoothed)?.save(&output)?;

        ctx.info(
            s,
            format_args!("Kernel applied, {kept} voxels above threshold"),
        );
        ctx.info(s, format_args!("Output saved to {}", output.display()));
        Ok(())
    }
}
