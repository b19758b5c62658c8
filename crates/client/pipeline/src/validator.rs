//! First pipeline stage: schema validation.
//!
//! Rejects envelopes whose version, method or parameter shape is
//! wrong, and forwards everything else to the cacher untouched. The
//! validator performs no network I/O; every check is local.

use lg_jsonrpc::{ErrorObject, Method, Response, VERSION};
use tokio::sync::mpsc;

use crate::{back_pressure_response, mailbox, Envelope, Mailbox, Rejected};

pub struct Validator {
    downstream: Mailbox,
}

impl Validator {
    /// `downstream` is the cacher's mailbox.
    pub fn new(downstream: Mailbox) -> Self {
        Self { downstream }
    }

    /// Starts the actor, returning its mailbox.
    pub fn spawn(self, capacity: usize) -> Mailbox {
        let (mailbox, rx) = mailbox(capacity);
        tokio::spawn(self.run(rx));
        mailbox
    }

    async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            self.handle(envelope);
        }
    }

    fn handle(&self, envelope: Envelope) {
        let request = &envelope.request;

        if request.jsonrpc != VERSION {
            let error = ErrorObject::invalid_version(&request.jsonrpc);
            let id = request.id.clone();
            envelope.respond(Response::error(id, error));
            return;
        }

        let Some(method) = Method::from_name(&request.method) else {
            let error = ErrorObject::unsupported_method(&request.method);
            let id = request.id.clone();
            envelope.respond(Response::error(id, error));
            return;
        };

        if method.validate_params(&request.params).is_err() {
            let id = request.id.clone();
            envelope.respond(Response::error(id, ErrorObject::invalid_params()));
            return;
        }

        if let Err(Rejected(envelope)) = self.downstream.send(envelope) {
            tracing::error!(method = %method, "cacher mailbox rejected envelope");
            let id = envelope.request.id.clone();
            envelope.respond(back_pressure_response(id));
        }
    }
}
