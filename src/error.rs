/// Error type for this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalGateError {
    /// Construction was attempted with an unusable configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// A queued item panicked while being released.
    #[error("item invocation failed: {0}")]
    ItemInvocation(String),

    /// The async runtime could not host the gate's timer.
    #[error("timer scheduling failed: {0}")]
    TimerScheduling(String),

    /// The gate was closed or its worker is no longer running.
    #[error("gate is unavailable")]
    GateUnavailable,
}
