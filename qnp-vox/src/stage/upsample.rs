//! 上采样在 FSLeyes 中人工完成, 这里只确认其产物已放到约定位置.

use super::{Stage, StageContext, SubjectError, SubjectProcedure, SubjectResult};
use crate::consts::files;
use crate::Subject;

pub(crate) struct Upsample;

impl SubjectProcedure for Upsample {
    fn stage(&self) -> Stage {
        Stage::Upsample
    }

    fn describe(&self, ctx: &StageContext<'_>, s: Subject) -> String {
        let expected = ctx.stage_dir(s, Stage::Upsample).join(files::upsampled(s));
        format!("Would check for {}", expected.display())
    }

    fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()> {
        let expected = ctx.stage_dir(s, Stage::Upsample).join(files::upsampled(s));
        if expected.exists() {
            ctx.info(s, format_args!("Found upsampled file {}", expected.display()));
            return Ok(());
        }
        ctx.error(
            s,
            format_args!(
                "Upsampled file not found, upsample {} manually and re-run the pipeline",
                ctx.config.input_mgz_path(s).display()
            ),
        );
        Err(SubjectError::InputMissing {
            what: "upsampled file",
            path: expected,
        })
    }
}
