//! The request pipeline: a chain of independently scheduled actors
//! (validator → cacher → dispatcher) communicating over bounded
//! mailboxes.
//!
//! Each actor owns its state and exposes a single submission point, a
//! [`Mailbox`]. Requests travel as [`Envelope`]s: the parsed request
//! paired with a one-shot reply channel that is written exactly once
//! by whichever stage terminates the request. No mutable state is
//! shared across actor boundaries; the response cache and the address
//! book synchronize internally and are injected where needed.

use lg_jsonrpc::{codes, ErrorObject, Request, Response};
use lg_store::NodeId;
use tokio::sync::{mpsc, oneshot};

pub mod aggregate;
pub mod cache;
pub mod cacher;
pub mod dispatcher;
pub mod validator;

pub use cacher::Cacher;
pub use dispatcher::Dispatcher;
pub use validator::Validator;

/// A request travelling through the pipeline, paired with its reply
/// channel and an optional back-end target hint.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    /// When set, the dispatcher contacts exactly this node instead of
    /// applying the per-method target policy.
    pub target: Option<NodeId>,
    /// Written exactly once by the terminating stage; consuming the
    /// sender is what guarantees the write-once contract.
    pub responder: oneshot::Sender<Response>,
}

impl Envelope {
    /// Wraps a request, returning the envelope and the receiving half
    /// of its reply channel.
    pub fn new(request: Request, target: Option<NodeId>) -> (Self, oneshot::Receiver<Response>) {
        let (responder, rx) = oneshot::channel();
        (Self { request, target, responder }, rx)
    }

    /// Terminates the envelope with `response`. A dropped receiver
    /// means the client stopped waiting; that is not an error here.
    pub fn respond(self, response: Response) {
        if self.responder.send(response).is_err() {
            tracing::debug!(method = %self.request.method, "reply channel dropped before response was written");
        }
    }
}

/// Sending handle to an actor's bounded mailbox.
#[derive(Clone, Debug)]
pub struct Mailbox(mpsc::Sender<Envelope>);

/// The mailbox rejected the envelope (full or actor gone). The
/// envelope is handed back so the caller can terminate it.
#[derive(Debug, thiserror::Error)]
#[error("mailbox rejected envelope, too much back pressure")]
pub struct Rejected(pub Envelope);

impl Mailbox {
    /// Non-blocking submission. A full mailbox is an immediate
    /// rejection, not a wait: back pressure must surface to the client
    /// instead of stalling the ingress.
    pub fn send(&self, envelope: Envelope) -> Result<(), Rejected> {
        self.0.try_send(envelope).map_err(|err| match err {
            mpsc::error::TrySendError::Full(envelope) => Rejected(envelope),
            mpsc::error::TrySendError::Closed(envelope) => Rejected(envelope),
        })
    }
}

/// Creates a bounded mailbox of the given capacity.
pub fn mailbox(capacity: usize) -> (Mailbox, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Mailbox(tx), rx)
}

/// The response written when a downstream mailbox rejects an envelope.
pub(crate) fn back_pressure_response(id: serde_json::Value) -> Response {
    Response::error(
        id,
        ErrorObject::new(codes::INTERNAL, "failed to forward request, too much back pressure in the gateway"),
    )
}
