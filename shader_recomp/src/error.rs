use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input bundle {0:?} does not exist")]
    MissingInput(PathBuf),

    #[error("output directory already exists at {0:?}. Pass --overwrite-output to replace it")]
    OutputCollision(PathBuf),

    #[error("{0}")]
    ToolchainMissing(String),

    #[error("external process failed: {0}")]
    EngineInvocation(String),

    #[error("error accessing files: {0}")]
    Io(#[from] std::io::Error),
}
