//! # Sync fallback conduit.
//!
//! When a terminal broker transition (done/retry/kill) fails, the worker
//! packages the exact call as a retryable closure and sends it down this
//! conduit. An external syncer drains the receiver and replays each
//! request until it succeeds; until then the message stays in the
//! in-progress set, where the next start's restore pass also reconciles
//! it.
//!
//! The channel is unbounded: sends never block a worker and nothing is
//! dropped. Depth is bounded in practice by the concurrency limit, since
//! each in-flight worker contributes at most one request per terminal
//! transition.

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::broker::BrokerError;

/// Replayable broker call, boxed so the syncer can retry it repeatedly.
pub type SyncOp = Box<dyn Fn() -> BoxFuture<'static, Result<(), BrokerError>> + Send + Sync>;

/// Sending half of the conduit, held by the processor.
pub type SyncSender = mpsc::UnboundedSender<SyncRequest>;

/// Receiving half of the conduit, drained by the external syncer.
pub type SyncReceiver = mpsc::UnboundedReceiver<SyncRequest>;

/// A deferred broker mutation with a human-readable description.
pub struct SyncRequest {
    /// The call to replay until it succeeds.
    pub op: SyncOp,
    /// What failed, for the syncer's logs.
    pub err_msg: String,
}

impl SyncRequest {
    /// Packages a replayable call with its description.
    pub fn new(err_msg: impl Into<String>, op: SyncOp) -> Self {
        Self {
            op,
            err_msg: err_msg.into(),
        }
    }
}

/// Creates a conduit pair. Hand the receiver to the syncer and the sender
/// to [`ProcessorBuilder::with_sync_conduit`](crate::ProcessorBuilder::with_sync_conduit).
pub fn sync_channel() -> (SyncSender, SyncReceiver) {
    mpsc::unbounded_channel()
}
