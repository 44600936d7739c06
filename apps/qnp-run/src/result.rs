//! 运行结果与状态的文本输出.

use std::io::{self, Write};
use std::path::Path;

use itertools::Itertools;
use qnp_vox::{MissingInput, RunReport, RunState, StageStatus, Subject};

const SEP: &str = "--------------------------------------------------------";
const S4: &str = "    ";

/// 最多列出的缺失文件数.
const MAX_LISTED_MISSING: usize = 10;

/// 简单分隔线.
#[inline]
fn sep_to<W: Write>(w: &mut W) -> io::Result<()> {
    writeln!(w, "{SEP}")
}

/// `--info` 的输出.
pub fn describe_info_into<W: Write>(
    config: &Path,
    version: &str,
    subjects: &[Subject],
    status: &[StageStatus],
    w: &mut W,
) -> io::Result<()> {
    sep_to(w)?;
    writeln!(w, "Configuration: {}", config.display())?;
    writeln!(w, "Pipeline version: {version}")?;
    writeln!(w, "Subjects: {}", subjects.len())?;
    writeln!(w, "{S4}{}", subjects.iter().join(", "))?;
    sep_to(w)?;
    writeln!(w, "Step status:")?;
    for st in status {
        writeln!(
            w,
            "{S4}{:<10} {:>4}/{} completed",
            st.stage.name(),
            st.completed,
            st.total
        )?;
    }
    sep_to(w)
}

/// `--validate-only` 的输出. 最多列出 10 个缺失文件, 其余只给出个数.
pub fn describe_validation_into<W: Write>(missing: &[MissingInput], w: &mut W) -> io::Result<()> {
    sep_to(w)?;
    if missing.is_empty() {
        writeln!(w, "All input files found")?;
        return sep_to(w);
    }
    writeln!(w, "Missing {} input files:", missing.len())?;
    for m in missing.iter().take(MAX_LISTED_MISSING) {
        writeln!(
            w,
            "{S4}Subject {}: {} - {}",
            m.subject,
            m.what,
            m.path.display()
        )?;
    }
    if missing.len() > MAX_LISTED_MISSING {
        writeln!(w, "{S4}... and {} more", missing.len() - MAX_LISTED_MISSING)?;
    }
    sep_to(w)
}

/// 一次运行的汇总.
pub fn describe_run_into<W: Write>(report: &RunReport, w: &mut W) -> io::Result<()> {
    sep_to(w)?;
    for o in &report.outcomes {
        writeln!(
            w,
            "{S4}{:<10} {}/{} successful, {} skipped",
            o.stage.name(),
            o.succeeded,
            o.attempted,
            o.skipped
        )?;
    }
    let verdict = match report.state {
        RunState::Completed => "completed".to_owned(),
        RunState::Failed(stage) => format!("failed at step `{stage}`"),
        RunState::NotStarted | RunState::Running(_) => "interrupted".to_owned(),
    };
    writeln!(w, "Pipeline {verdict}")?;
    sep_to(w)
}
