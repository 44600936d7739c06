//! 从 Halo 标注与 Summary Analysis 表提取 tile 记录.
//!
//! 产物: `{s}_tile_coord.csv` (全部顶点), `{s}_AT8.csv` (测量值), `{s}_tile_proc.csv` (拼接结果).

use super::{require, Stage, StageContext, SubjectError, SubjectProcedure, SubjectResult};
use crate::annotation::{self, COORDINATE_HEADER, MEASUREMENT_HEADER, TILE_RECORD_HEADER};
use crate::consts::files;
use crate::Subject;

pub(crate) struct Extract;

impl SubjectProcedure for Extract {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    fn describe(&self, ctx: &StageContext<'_>, s: Subject) -> String {
        format!(
            "Would extract coordinates from {} to {}",
            ctx.config.input_annotation_path(s).display(),
            ctx.stage_dir(s, Stage::Extract).display()
        )
    }

    fn process(&self, ctx: &StageContext<'_>, s: Subject) -> SubjectResult<()> {
        let annotation_file = ctx.config.input_annotation_path(s);
        let summary_file = ctx.config.summary_csv_path();
        require("annotation file", &annotation_file)?;
        require("summary CSV file", &summary_file)?;
        let out_dir = ctx.stage_dir(s, Stage::Extract);

        ctx.info(s, format_args!("Processing {}", annotation_file.display()));
        let coords = annotation::read_coordinates(&annotation_file)?;
        if coords.is_empty() {
            return Err(SubjectError::NoCoordinates(annotation_file));
        }
        ctx.info(
            s,
            format_args!("Extracted {} coordinates (excluding Layer 1)", coords.len()),
        );

        let measurements = annotation::read_measurements(&summary_file, s)?;
        ctx.info(
            s,
            format_args!("Extracted {} AT8 values", measurements.len()),
        );
        if measurements.is_empty() {
            ctx.warn(
                s,
                "No AT8 measurements found, falling back to coordinates with value 0",
            );
        }

        let records = annotation::join(&coords, &measurements);
        if !measurements.is_empty() && records.len() < measurements.len() {
            ctx.warn(
                s,
                format_args!(
                    "Only {} of {} measurements have a matching vertex",
                    records.len(),
                    measurements.len()
                ),
            );
        }

        annotation::write_csv(out_dir.join(files::tile_coord(s)), &COORDINATE_HEADER, &coords)?;
        annotation::write_csv(out_dir.join(files::at8(s)), &MEASUREMENT_HEADER, &measurements)?;
        annotation::write_csv(out_dir.join(files::tile_proc(s)), &TILE_RECORD_HEADER, &records)?;
        ctx.info(
            s,
            format_args!("Coordinate extraction completed, {} tile records", records.len()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use crate::stage::testing::{config_in, ok_output, FakeExecutor};
    use crate::stage::StageRunner;
    use std::fs;
    use std::path::Path;

    const SUMMARY: &str = "Image Tag,Analysis Region,% AT8 Positive Tissue\n\
                           21-6966-A1-AT8.svs,Tile 1,1.5\n\
                           21-6966-A1-AT8.svs,Layer 1,99\n\
                           21-7038-A1-AT8.svs,Tile 1,7\n\
                           21-6966-A1-AT8.svs,Tile 2,2.5\n";

    fn seed(root: &Path, subject: Subject, tiles: usize) {
        let ann = root.join("annotations");
        fs::create_dir_all(&ann).unwrap();
        let mut xml = String::from("<Annotations><Annotation Name=\"Layer 1\"><V X=\"1\" Y=\"1\"/></Annotation>");
        for t in 0..tiles {
            xml.push_str(&format!("<Annotation Name=\"Tile {}\">", t + 1));
            for v in 0..5 {
                xml.push_str(&format!("<V X=\"{}\" Y=\"{}\"/>", 10_000 * (t + 1) + v, 3_000 + v));
            }
            xml.push_str("</Annotation>");
        }
        xml.push_str("</Annotations>");
        fs::write(ann.join(format!("{subject}-A1-AT8.annotations")), xml).unwrap();
        fs::write(root.join("summary.csv"), SUMMARY).unwrap();
    }

    #[test]
    fn test_extract_writes_joined_records() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        seed(tmp.path(), 6966, 2);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let runner = StageRunner::new(Stage::Extract, StageContext::new(&cfg, &exec, &rep));

        assert!(runner.run(&[6966], false, false).is_success());
        let dir = cfg.subject_stage_dir(6966, Stage::Extract);
        let records = annotation::read_tile_records(dir.join(files::tile_proc(6966))).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].x, records[0].z, records[0].value), (10, 3, 1.5));
        assert_eq!((records[1].x, records[1].z, records[1].value), (20, 3, 2.5));
        assert!(dir.join(files::tile_coord(6966)).is_file());
        assert!(dir.join(files::at8(6966)).is_file());

        // 续跑时直接跳过.
        let again = runner.run(&[6966], false, false);
        assert_eq!((again.attempted, again.skipped), (0, 1));
    }

    #[test]
    fn test_no_measurements_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        seed(tmp.path(), 5000, 1);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let ctx = StageContext::new(&cfg, &exec, &rep);
        fs::create_dir_all(ctx.stage_dir(5000, Stage::Extract)).unwrap();

        Extract.process(&ctx, 5000).unwrap();
        let records = annotation::read_tile_records(
            ctx.stage_dir(5000, Stage::Extract).join(files::tile_proc(5000)),
        )
        .unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].x, 10_000);
        assert!(records.iter().all(|r| r.value == 0.0));
        assert!(rep.contains("falling back"));
    }

    #[test]
    fn test_calibration_only_annotation_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config_in(tmp.path(), &[]);
        seed(tmp.path(), 6966, 0);
        let exec = FakeExecutor::new(ok_output);
        let rep = MemoryReporter::new();
        let ctx = StageContext::new(&cfg, &exec, &rep);
        fs::create_dir_all(ctx.stage_dir(6966, Stage::Extract)).unwrap();

        assert!(matches!(
            Extract.process(&ctx, 6966),
            Err(SubjectError::NoCoordinates(_))
        ));
    }
}
