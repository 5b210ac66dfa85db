//! Error taxonomy shared by the manager and trader processes

use thiserror::Error;

/// Runtime error kinds.
///
/// Errors stay local unless they threaten invariants: strategy errors never
/// stop a trader, executor errors never stop the bus, and only lifecycle
/// failures (PID collision, unusable config) escalate to process exit.
#[derive(Debug, Error)]
pub enum TraderError {
    /// Socket reset, malformed frame or framing underrun; the connection is
    /// closed and the manager's reconnect loop recovers.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unknown request type or malformed payload; answered on the same
    /// request id without dropping the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A request future expired; no side effects are assumed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Upstream reject, disconnect or auth failure.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Pre-trade risk check failed; raised before the gateway is called.
    #[error("risk check failed: {0}")]
    Risk(String),

    /// Exception inside a user strategy handler; isolated from siblings.
    #[error("strategy error: {0}")]
    Strategy(String),

    /// Fatal startup condition such as a PID collision.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl TraderError {
    /// Short kind tag used in structured log fields
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Timeout(_) => "timeout",
            Self::Gateway(_) => "gateway",
            Self::Risk(_) => "risk",
            Self::Strategy(_) => "strategy",
            Self::Lifecycle(_) => "lifecycle",
        }
    }
}

impl From<std::io::Error> for TraderError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result alias for fallible runtime operations
pub type TraderResult<T> = Result<T, TraderError>;
