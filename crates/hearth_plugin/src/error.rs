use hearth_bus::BusError;

/// Errors returned by plugin hooks and the runtime client
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A start/stop hook refused or failed; the hub receives a negative ack
    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl PluginError {
    pub fn hook(message: impl Into<String>) -> Self {
        PluginError::Hook(message.into())
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
