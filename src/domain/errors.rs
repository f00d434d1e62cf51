//! Domain errors for the Maestro orchestrator core.
//!
//! One taxonomy shared by every subsystem, using thiserror for structured
//! error handling. Retryability drives failover in the provider registry and
//! retry scheduling in the workflow engine.

use thiserror::Error;
use uuid::Uuid;

/// Core errors surfaced by the planner, workflow engine, provider registry,
/// and memory repository.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied input failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested plan cannot be satisfied under the given constraints.
    #[error("Plan infeasible: {0}")]
    Infeasible(String),

    /// The step dependency graph contains a cycle.
    #[error("Dependency cycle detected involving step: {0}")]
    DependencyCycle(String),

    /// The agent lacks the required permission on a memory record.
    #[error("Agent '{agent}' lacks {permission} permission on record {record_id}")]
    Forbidden {
        agent: String,
        permission: &'static str,
        record_id: Uuid,
    },

    /// Memory record was not found.
    #[error("Record not found: {0}")]
    NotFound(Uuid),

    /// A record with this id already exists.
    #[error("Duplicate record id: {0}")]
    DuplicateKey(Uuid),

    /// A provider rejected the request with a non-retryable error (auth,
    /// malformed content, unknown model).
    #[error("Provider '{provider}' error: {message}")]
    ProviderError { provider: String, message: String },

    /// The per-provider token bucket could not issue a token in time.
    #[error("Rate limit timeout on provider '{0}'")]
    RateLimitTimeout(String),

    /// The provider's circuit breaker is open.
    #[error("Circuit open for provider '{0}'")]
    CircuitOpen(String),

    /// A network or adapter call timed out.
    #[error("Timeout after {0} ms")]
    Timeout(u64),

    /// Transient server-side failure (5xx, connection reset).
    #[error("Transient provider failure on '{provider}': {message}")]
    TransientServer { provider: String, message: String },

    /// An agent handler failed; the workflow engine may retry it.
    #[error("Agent '{agent}' failed: {message}")]
    AgentFailure { agent: String, message: String },

    /// Execution was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,

    /// A checkpoint could not be written.
    #[error("Checkpoint write failed: {0}")]
    CheckpointWrite(String),

    /// Every registered provider was attempted or skipped.
    #[error("No providers available: {0}")]
    NoProvidersAvailable(String),

    /// Storage-layer failure (SQLite, filesystem).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether this error may succeed when retried (on the same provider for
    /// timeouts and transient failures, on another provider for rate-limit
    /// and open-circuit errors).
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitTimeout(_)
                | Self::CircuitOpen(_)
                | Self::Timeout(_)
                | Self::TransientServer { .. }
                | Self::AgentFailure { .. }
                | Self::CheckpointWrite(_)
        )
    }

    /// Whether the failure is pinned to one provider but another provider may
    /// still serve the request.
    pub const fn allows_failover(&self) -> bool {
        matches!(
            self,
            Self::RateLimitTimeout(_)
                | Self::CircuitOpen(_)
                | Self::Timeout(_)
                | Self::TransientServer { .. }
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if db.message().contains("UNIQUE constraint failed") {
                return CoreError::DuplicateKey(Uuid::nil());
            }
        }
        CoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}
