use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::display::{Display, Shared, StimulusId, shared};
use crate::error::{CoreError, ErrorSink, LogSink, Result};

/// Run-wide state handed to the schedulers and the procedure state machine.
///
/// Owns the registry of stimulus instances that are currently part of a
/// display list. The control thread adds and removes entries between units;
/// schedulers only clone handles out of it.
pub struct RuntimeContext<D> {
    config: RuntimeConfig,
    errors: Arc<dyn ErrorSink>,
    displays: BTreeMap<StimulusId, Shared<D>>,
}

impl<D: Display> RuntimeContext<D> {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            errors: Arc::new(LogSink),
            displays: BTreeMap::new(),
        }
    }

    pub fn with_error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RuntimeConfig {
        &mut self.config
    }

    pub fn error_sink(&self) -> Arc<dyn ErrorSink> {
        Arc::clone(&self.errors)
    }

    pub fn report(&self, error: &CoreError) {
        self.errors.report(error);
    }

    /// Registers `display`, replacing any instance with the same id.
    pub fn register(&mut self, display: D) -> Shared<D> {
        let id = display.id();
        let handle = shared(display);
        if self.displays.insert(id, Arc::clone(&handle)).is_some() {
            tracing::debug!("replaced runtime display {}", id);
        }
        handle
    }

    pub fn display(&self, id: StimulusId) -> Result<Shared<D>> {
        self.displays
            .get(&id)
            .cloned()
            .ok_or(CoreError::UnknownStimulus(id))
    }

    pub fn remove(&mut self, id: StimulusId) -> Option<Shared<D>> {
        self.displays.remove(&id)
    }
}
