//! Retryable execution of read operations.
//!
//! A read-style operation (find, count, explain, aggregate) is executed
//! through [`execute_with_retry`]: select a server, run the operation
//! once, and on a retryable failure re-select and run it exactly once
//! more. The operation must be idempotent; `getMore` on an open cursor is
//! not routed through here.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::ChannelSource;
use crate::error::Result;
use crate::options::ReadPreference;
use crate::session::Binding;

/// An idempotent command exchange that may be transparently re-executed.
#[async_trait]
pub trait ReadOperation: Send + Sync {
    type Output: Send;

    /// Command name, for logging.
    fn name(&self) -> &'static str;

    /// Run the exchange on the given channel.
    async fn execute(
        &self,
        source: &ChannelSource,
        binding: &Binding,
        cancel: &CancellationToken,
    ) -> Result<Self::Output>;
}

/// Acquire a channel and run `op`, retrying at most once.
///
/// The retry fires only when the caller requested it, the selected server
/// supports retryable reads, and the failure is classified retryable. The
/// second attempt may land on a different server. Channels are released
/// when their source goes out of scope.
pub async fn execute_with_retry<O: ReadOperation>(
    binding: &Binding,
    read_preference: &ReadPreference,
    retry_requested: bool,
    op: &O,
    cancel: &CancellationToken,
) -> Result<O::Output> {
    let source = binding.select_server(read_preference, cancel).await?;
    let retry_permitted = retry_requested && source.server().supports_retryable_reads();

    match op.execute(&source, binding, cancel).await {
        Ok(output) => Ok(output),
        Err(e) if retry_permitted && e.is_retryable_read() && !cancel.is_cancelled() => {
            debug!("retrying '{}' after retryable error: {}", op.name(), e);
            drop(source);
            let source = binding.select_server(read_preference, cancel).await?;
            op.execute(&source, binding, cancel).await
        }
        Err(e) => Err(e),
    }
}
