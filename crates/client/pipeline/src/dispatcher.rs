//! Final pipeline stage: fan-out to the back-end fleet.
//!
//! For each envelope the dispatcher selects a target list from the
//! address book, fans the request out with one task per target, and
//! collapses the replies through the method's [`Aggregator`]. Each
//! envelope is handled in its own task: one slow fan-out must not
//! serialize the mailbox behind it.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use lg_jsonrpc::{codes, ErrorObject, Method, Response};
use lg_node_client::NodeClient;
use lg_store::{AddressBook, NodeId};
use tokio::sync::mpsc;
use url::Url;

use crate::aggregate::Aggregator;
use crate::{mailbox, Envelope, Mailbox};

/// How many nodes a tx-status query is fanned out to when no explicit
/// target is given.
const QUERY_TX_FANOUT: usize = 3;

pub struct Dispatcher {
    store: Arc<AddressBook>,
    client: NodeClient,
}

impl Dispatcher {
    pub fn new(store: Arc<AddressBook>, client: NodeClient) -> Self {
        Self { store, client }
    }

    pub fn spawn(self, capacity: usize) -> Mailbox {
        let (mailbox, rx) = mailbox(capacity);
        tokio::spawn(self.run(rx));
        mailbox
    }

    async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        let dispatcher = Arc::new(self);
        while let Some(envelope) = rx.recv().await {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.handle(envelope).await });
        }
    }

    async fn handle(&self, envelope: Envelope) {
        let Some(method) = Method::from_name(&envelope.request.method) else {
            unreachable!("the validator only forwards catalogued methods");
        };

        let Envelope { request, target, responder } = envelope;
        let targets = self.targets(method, target.as_ref());

        if targets.is_empty() {
            let error = ErrorObject::new(codes::FORWARDING_ERROR, "no known node addresses to forward the request to");
            let _ = responder.send(Response::error(request.id, error));
            return;
        }

        let total = targets.len();
        let mut aggregator = Aggregator::for_method(method, request.id.clone(), total);

        let mut calls: FuturesUnordered<_> = targets
            .into_iter()
            .map(|(node, addr)| {
                let client = self.client.clone();
                let request = request.clone();
                async move {
                    match client.send(&addr, &request).await {
                        Ok(response) => response,
                        Err(err) => {
                            tracing::warn!(node = %node, error = %err, "error forwarding request to node");
                            let error = ErrorObject::new(
                                codes::FORWARDING_ERROR,
                                format!("error forwarding request to node: {err}"),
                            );
                            Response::error(request.id.clone(), error)
                        }
                    }
                }
            })
            .collect();

        let mut received = 0;
        while let Some(response) = calls.next().await {
            received += 1;
            if let Some(aggregate) = aggregator.update(response, received == total) {
                // Dropping the remaining calls cancels them; any reply
                // still in flight is discarded.
                let _ = responder.send(aggregate);
                return;
            }
        }

        // Every aggregator yields on the final reply, so this is only
        // reachable if the fan-out produced no replies at all.
        let error = ErrorObject::new(codes::INTERNAL, "fan-out finished without an aggregate response");
        let _ = responder.send(Response::error(request.id, error));
    }

    /// The per-method target policy: an explicit hint pins the request
    /// to that node; broadcasts go to every known node; tx-status
    /// queries try a few nodes; plain queries ask one node at random.
    fn targets(&self, method: Method, hint: Option<&NodeId>) -> Vec<(NodeId, Url)> {
        if let Some(id) = hint {
            return match self.store.get(id) {
                Some(addr) => vec![(id.clone(), addr)],
                None => Vec::new(),
            };
        }
        match method {
            Method::SubmitTx => self.store.all(),
            Method::QueryTx => self.store.sample(QUERY_TX_FANOUT),
            _ => self.store.sample(1),
        }
    }
}
