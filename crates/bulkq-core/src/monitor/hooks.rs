use async_trait::async_trait;
use thiserror::Error;

/// A failed mitigation hook. Logged and skipped; the ladder carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mitigation hook {hook} failed: {message}")]
pub struct MitigationError {
    pub hook: String,
    pub message: String,
}

impl MitigationError {
    pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// Something that can relieve memory pressure when its action runs.
#[async_trait]
pub trait MitigationHook: Send + Sync {
    /// Shown in logs.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), MitigationError>;
}
