//! Command exchange contract between the core and the wire layer.
//!
//! The core never frames messages itself: it hands fully built command
//! documents to a [`Channel`] and consumes reply documents. The
//! [`ChannelSource`] wrapper layered on top advances session state from
//! every reply and converts failed replies into typed server errors.

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DriverError, Result, ServerError};
use crate::options::ReadPreference;
use crate::session::Binding;

/// Description of the server a channel is connected to.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Host and port, e.g. `localhost:27017`
    pub address: String,

    /// Highest wire version the server speaks
    pub max_wire_version: i32,
}

impl ServerInfo {
    /// Servers at wire version 6 and above support retryable reads.
    pub fn supports_retryable_reads(&self) -> bool {
        self.max_wire_version >= 6
    }

    /// Servers at wire version 7 and above accept `startAtOperationTime`.
    pub fn supports_start_at_operation_time(&self) -> bool {
        self.max_wire_version >= 7
    }
}

/// A single connection capable of one command exchange at a time.
///
/// Implementations own framing, compression, and authentication. Transport
/// failures surface as [`DriverError::Io`]; the raw reply document is
/// returned regardless of its `ok` value.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Issue a command against `database` and return the reply document.
    ///
    /// # Arguments
    /// * `database` - Database the command targets
    /// * `command` - Fully built command body
    /// * `read_preference` - Routing hint encoded by the wire layer
    /// * `cancel` - Abandons the in-flight exchange when triggered
    async fn command(
        &self,
        database: &str,
        command: Document,
        read_preference: Option<&ReadPreference>,
        cancel: &CancellationToken,
    ) -> Result<Document>;
}

/// A selected channel together with the description of its server.
///
/// Cloning is cheap; the underlying connection is released when the last
/// clone drops.
#[derive(Clone)]
pub struct ChannelSource {
    channel: Arc<dyn Channel>,
    server: ServerInfo,
}

impl ChannelSource {
    pub fn new(channel: Arc<dyn Channel>, server: ServerInfo) -> Self {
        Self { channel, server }
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Run a command and post-process the reply.
    ///
    /// Checks cancellation before any I/O, advances the session's
    /// `operationTime` and `$clusterTime` from the reply (errors included,
    /// so causal consistency updates in lockstep with replies), and maps
    /// `ok != 1` replies to [`DriverError::Server`].
    pub async fn run_command(
        &self,
        binding: &Binding,
        database: &str,
        command: Document,
        read_preference: Option<&ReadPreference>,
        cancel: &CancellationToken,
    ) -> Result<Document> {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        let name = command
            .keys()
            .next()
            .map(String::from)
            .unwrap_or_else(|| "<empty>".to_string());
        debug!("issuing '{}' against database '{}'", name, database);

        let reply = self
            .channel
            .command(database, command, read_preference, cancel)
            .await?;

        if let Ok(ts) = reply.get_timestamp("operationTime") {
            binding.advance_operation_time(ts);
        }
        if let Ok(ct) = reply.get_document("$clusterTime") {
            binding.advance_cluster_time(ct.clone());
        }

        if let Some(err) = ServerError::from_reply(&reply) {
            return Err(DriverError::Server(err));
        }

        Ok(reply)
    }
}

impl std::fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSource")
            .field("server", &self.server)
            .finish()
    }
}
