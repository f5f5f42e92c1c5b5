use stimex_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresentError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to spawn presentation worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("presentation worker for {0} panicked")]
    WorkerPanicked(String),

    #[error("surface allocation failed: {width}x{height}")]
    Surface { width: u32, height: u32 },
}

pub type Result<T> = std::result::Result<T, PresentError>;
