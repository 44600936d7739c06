//! 按人工锚点把 tile 记录放进上采样体数据的体素网格.

use super::{require, Stage, StageContext, SubjectProcedure, SubjectResult};
use crate::anchor::ManualAnchor;
use crate::annotation;
use crate::consts::files;
use crate::volume::{self, ReferenceGrid, VolumeHeaderAttr, TRANSFORMED_HEADER};
use crate::Subject;

pub(crate) struct Transform;

impl SubjectProcedure for Transform {
    fn stage(&self) -> Stage {
        Stage::Transform
    }

    fn describe(&self, ctx: &StageContext<'_>, s: Subject) -> String {
        format!(
            "Would transform coordinates for {s} into {}",
            ctx.stage_dir(s, Stage::Transform).display()
        )
    }

    fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()> {
        let tile_proc = ctx.stage_dir(s, Stage::Extract).join(files::tile_proc(s));
        let reference = ctx.stage_dir(s, Stage::Upsample).join(files::upsampled(s));
        let anchors = ctx.config.manual_coordinates_file();
        require("processed tile file", &tile_proc)?;
        require("upsampled NIfTI file", &reference)?;
        require("manual coordinates file", &anchors)?;
        let out_dir = ctx.stage_dir(s, Stage::Transform);

        let anchor = ManualAnchor::load(&anchors, s)?;
        ctx.info(
            s,
            format_args!(
                "Manual coordinates X={}, Y={}, Z={}",
                anchor.x, anchor.y_slice, anchor.z
            ),
        );

        let records = annotation::read_tile_records(&tile_proc)?;
        ctx.info(s, format_args!("Loaded {} tile entries", records.len()));
        let grid = ReferenceGrid::open(&reference)?;
        ctx.info(s, format_args!("Image shape {:?}", grid.shape()));

        let built = volume::build(&grid, &records, &anchor, ctx.config.block_size());
        for &i in &built.out_of_bounds {
            let t = &built.transformed[i];
            ctx.warn(
                s,
                format_args!(
                    "Coordinates ({},{},{}) out of bounds for {}",
                    t.x, t.y, t.z, t.tile
                ),
            );
        }

        let mask = out_dir.join(files::mask_block(s));
        built.volume.save(&mask)?;
        let coords = out_dir.join(files::transformed_coordinates(s));
        annotation::write_csv(&coords, &TRANSFORMED_HEADER, &built.transformed)?;

        ctx.info(
            s,
            format_args!(
                "Created 3D mask with {} of {} blocks",
                built.placed(),
                built.transformed.len()
            ),
        );
        ctx.info(s, format_args!("Saved mask to {}", mask.display()));
        ctx.info(
            s,
            format_args!("Saved transformed coordinates to {}", coords.display()),
        );
        Ok(())
    }
}
