use parking_lot::Mutex;
use thiserror::Error;

use crate::display::StimulusId;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("negative intended duration: {0} ns")]
    NegativeDuration(i64),

    #[error("stimulus {0} is not registered")]
    UnknownStimulus(StimulusId),

    #[error("device error: {0}")]
    Device(String),

    #[error("unit '{0}' reported an error")]
    Unit(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Receiver for errors that must be reported but never abort a run.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &CoreError);
}

/// Default sink: logs at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, error: &CoreError) {
        tracing::warn!("non-fatal: {}", error);
    }
}

/// Keeps the rendered messages of every reported error.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: &CoreError) {
        tracing::warn!("non-fatal: {}", error);
        self.messages.lock().push(error.to_string());
    }
}
