//! Provider adapter port - interface for LLM backends.

use async_trait::async_trait;

use crate::domain::errors::CoreResult;
use crate::domain::models::{LlmRequest, LlmResponse, ProviderKind};

/// One LLM backend. The surface is identical across variants; semantics
/// differ in credential validation, endpoint defaults, and prompt encoding.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registered provider name (unique within the registry).
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Model served when the request does not override it.
    fn model(&self) -> &str;

    /// Validate credentials and prepare the client. Must be called before
    /// `execute`; the registry skips uninitialized providers.
    async fn initialize(&self) -> CoreResult<()>;

    /// Run one completion request. Request timeouts are enforced by the
    /// caller around this future.
    async fn execute(&self, request: &LlmRequest) -> CoreResult<LlmResponse>;

    /// Cheap liveness probe.
    async fn test(&self) -> CoreResult<()>;

    /// Whether `initialize` has completed successfully.
    fn is_initialized(&self) -> bool;
}
