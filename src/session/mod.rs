//! Session state and the forked binding handle.
//!
//! A [`Binding`] couples a server selector with the causal-consistency
//! state of one logical session. Cursors hold independent handles produced
//! by [`Binding::fork`]; the underlying session lives until the last handle
//! drops.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bson::{Document, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelSource;
use crate::error::Result;
use crate::options::ReadPreference;

/// Causal-consistency state carried by one logical session.
///
/// Updated in lockstep with server replies; accessed serially behind the
/// binding's lock.
#[derive(Debug, Default)]
pub struct SessionState {
    operation_time: Option<Timestamp>,
    cluster_time: Option<Document>,
}

impl SessionState {
    /// Advance the operation time, keeping it monotonic.
    pub fn advance_operation_time(&mut self, ts: Timestamp) {
        let newer = match self.operation_time {
            Some(current) => (ts.time, ts.increment) > (current.time, current.increment),
            None => true,
        };
        if newer {
            self.operation_time = Some(ts);
        }
    }

    /// Record the gossiped cluster time from a reply.
    pub fn advance_cluster_time(&mut self, cluster_time: Document) {
        self.cluster_time = Some(cluster_time);
    }

    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    pub fn cluster_time(&self) -> Option<&Document> {
        self.cluster_time.as_ref()
    }
}

/// Selects a server matching a read preference and yields a channel to it.
///
/// Implementations own topology discovery and connection pooling.
#[async_trait]
pub trait ServerSelector: Send + Sync {
    async fn select_server(
        &self,
        read_preference: &ReadPreference,
        cancel: &CancellationToken,
    ) -> Result<ChannelSource>;
}

/// A reference-counted handle over a selector and its session.
///
/// `fork` produces an independent handle with its own drop lifetime; the
/// session state is shared and released when the last handle drops.
#[derive(Clone)]
pub struct Binding {
    inner: Arc<BindingInner>,
}

struct BindingInner {
    selector: Arc<dyn ServerSelector>,
    session: Mutex<SessionState>,
}

impl Binding {
    pub fn new(selector: Arc<dyn ServerSelector>) -> Self {
        Self {
            inner: Arc::new(BindingInner {
                selector,
                session: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// Produce an independent handle to the same session.
    pub fn fork(&self) -> Binding {
        Binding {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Select a server matching `read_preference` and acquire a channel.
    pub async fn select_server(
        &self,
        read_preference: &ReadPreference,
        cancel: &CancellationToken,
    ) -> Result<ChannelSource> {
        self.inner
            .selector
            .select_server(read_preference, cancel)
            .await
    }

    /// The session's last observed operation time.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.session().operation_time()
    }

    pub(crate) fn advance_operation_time(&self, ts: Timestamp) {
        self.session().advance_operation_time(ts);
    }

    pub(crate) fn advance_cluster_time(&self, cluster_time: Document) {
        self.session().advance_cluster_time(cluster_time);
    }

    fn session(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
