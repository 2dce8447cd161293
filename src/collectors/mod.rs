pub mod display;
pub mod gpu;
pub mod shell;
pub mod system;

use crate::model::{DisplayConnection, GpuHealth};
use shell::CommandError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("unexpected {what} output: {source}")]
    Parse {
        what: &'static str,
        source: serde_json::Error,
    },
}

pub trait MonitorSource: Send + Sync {
    fn monitors(&self) -> Result<Vec<DisplayConnection>, ProbeError>;
}

pub trait GpuSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn gpus(&self) -> Result<Vec<GpuHealth>, ProbeError>;
}
