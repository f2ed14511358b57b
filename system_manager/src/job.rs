//! Job abstraction.

use async_trait::async_trait;
use serde_json::Value;

use crate::trigger::Trigger;

/// A unit of scheduled work.
///
/// The returned value is kept as the output of the run and shown in status.
#[async_trait]
pub trait Job: Send + Sync {
    /// Executes the job once.
    async fn run(&self) -> anyhow::Result<Value>;
}

/// Declarative description of a recurring job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Stable id; registering the same id again replaces the job.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// When it fires.
    pub trigger: Trigger,
    /// Disabled jobs are listed and can run manually but never fire.
    pub enabled: bool,
}

impl JobDescriptor {
    /// Enabled descriptor.
    pub fn new(id: impl Into<String>, name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trigger,
            enabled: true,
        }
    }

    /// Sets the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
