//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Subject};

pub use crate::config::{ConfigStore, PipelineConfig};
pub use crate::consts::{defaults, files};
pub use crate::exec::{CommandExecutor, SystemExecutor};
pub use crate::ledger::OutputLedger;
pub use crate::orchestrator::{Orchestrator, RunPolicy, RunReport, RunState, StageStatus};
pub use crate::report::{LogReporter, Reporter};
pub use crate::stage::{Stage, StageOutcome};
pub use crate::volume::{DensityVolume, ReferenceGrid, VolumeHeaderAttr};
