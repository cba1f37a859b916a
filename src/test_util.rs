//! Scripted transport doubles shared by the unit and scenario tests.
//!
//! `MockChannel` replays queued replies (or errors) in order and records
//! every command it is handed, so tests can assert on the exact command
//! stream a cursor produced. `MockTopology` is a single-server selector
//! that counts selections, which is how the retry tests observe
//! re-selection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelSource, ServerInfo};
use crate::error::{DriverError, Result};
use crate::options::ReadPreference;
use crate::session::{Binding, ServerSelector};

#[derive(Clone)]
pub(crate) struct MockChannel {
    state: Arc<MockChannelState>,
    server: ServerInfo,
}

struct MockChannelState {
    replies: Mutex<VecDeque<Result<Document>>>,
    commands: Mutex<Vec<(String, Document)>>,
}

impl MockChannel {
    pub(crate) fn new(max_wire_version: i32) -> Self {
        Self {
            state: Arc::new(MockChannelState {
                replies: Mutex::new(VecDeque::new()),
                commands: Mutex::new(Vec::new()),
            }),
            server: ServerInfo {
                address: "localhost:27017".to_string(),
                max_wire_version,
            },
        }
    }

    /// Queue a reply document for the next command.
    pub(crate) fn push_reply(&self, reply: Document) {
        self.state
            .replies
            .lock()
            .unwrap()
            .push_back(Ok(reply));
    }

    /// Queue a transport-level failure for the next command.
    pub(crate) fn push_error(&self, err: DriverError) {
        self.state.replies.lock().unwrap().push_back(Err(err));
    }

    /// Every `(database, command)` pair issued so far, in order.
    pub(crate) fn commands(&self) -> Vec<(String, Document)> {
        self.state.commands.lock().unwrap().clone()
    }

    /// The leading key of every command issued so far, in order.
    pub(crate) fn command_names(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|(_, cmd)| cmd.keys().next().map(String::from))
            .collect()
    }

    pub(crate) fn server_info(&self) -> ServerInfo {
        self.server.clone()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn command(
        &self,
        database: &str,
        command: Document,
        _read_preference: Option<&ReadPreference>,
        cancel: &CancellationToken,
    ) -> Result<Document> {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        self.state
            .commands
            .lock()
            .unwrap()
            .push((database.to_string(), command));
        self.state
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DriverError::Protocol("no scripted reply".to_string())))
    }
}

pub(crate) struct MockTopology {
    channel: MockChannel,
    selections: AtomicUsize,
}

impl MockTopology {
    pub(crate) fn new(channel: MockChannel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            selections: AtomicUsize::new(0),
        })
    }

    pub(crate) fn selections(&self) -> usize {
        self.selections.load(Ordering::SeqCst)
    }

    pub(crate) fn source(&self) -> ChannelSource {
        ChannelSource::new(Arc::new(self.channel.clone()), self.channel.server_info())
    }
}

#[async_trait]
impl ServerSelector for MockTopology {
    async fn select_server(
        &self,
        _read_preference: &ReadPreference,
        cancel: &CancellationToken,
    ) -> Result<ChannelSource> {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        self.selections.fetch_add(1, Ordering::SeqCst);
        Ok(self.source())
    }
}

/// A binding plus a pre-selected source over the same scripted channel.
pub(crate) fn scripted_binding(channel: MockChannel) -> (Binding, ChannelSource) {
    let topology = MockTopology::new(channel);
    let source = topology.source();
    (Binding::new(topology), source)
}

/// Build a cursor reply in the standard shape.
pub(crate) fn cursor_reply(
    id: i64,
    ns: &str,
    first: bool,
    docs: Vec<Document>,
    post_batch_resume_token: Option<Document>,
) -> Document {
    let batch_key = if first { "firstBatch" } else { "nextBatch" };
    let batch: Vec<Bson> = docs.into_iter().map(Bson::Document).collect();
    let mut cursor = doc! { "id": id, "ns": ns };
    cursor.insert(batch_key, batch);
    if let Some(token) = post_batch_resume_token {
        cursor.insert("postBatchResumeToken", token);
    }
    doc! { "cursor": cursor, "ok": 1.0 }
}

/// Build a failed command reply with the given code.
pub(crate) fn error_reply(code: i32, errmsg: &str) -> Document {
    let mut reply = doc! { "ok": 0.0, "code": code, "errmsg": errmsg };
    if let Some(name) = crate::error::codes::error_name(code) {
        reply.insert("codeName", name);
    }
    reply
}

/// Build a `killCursors` reply confirming the kill.
pub(crate) fn kill_reply(killed: &[i64], not_found: &[i64]) -> Document {
    doc! {
        "ok": 1.0,
        "cursorsKilled": killed.to_vec(),
        "cursorsNotFound": not_found.to_vec(),
        "cursorsAlive": Vec::<i64>::new(),
        "cursorsUnknown": Vec::<i64>::new(),
    }
}
