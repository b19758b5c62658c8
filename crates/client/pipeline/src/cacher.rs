//! Second pipeline stage: the response cache front.
//!
//! Serves cacheable repeats from memory and forwards everything else
//! to the dispatcher. The cacher never waits on a back-end itself: a
//! miss forwards the envelope with an internal reply channel and a
//! spawned task completes the cache insert and the client reply once
//! the dispatcher answers, so a slow fan-out never blocks the mailbox.
//!
//! Concurrent misses for the same key are coalesced: followers park
//! their reply channels on the in-flight entry and share the single
//! dispatcher round-trip.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lg_jsonrpc::{Method, Response};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::cache::{CacheKey, ResponseCache};
use crate::{back_pressure_response, mailbox, Envelope, Mailbox, Rejected};

/// Reply channels parked on an in-flight fetch, each remembering the
/// request id its response must carry.
type Waiters = HashMap<CacheKey, Vec<(Value, oneshot::Sender<Response>)>>;

pub struct Cacher {
    dispatcher: Mailbox,
    cache: Arc<ResponseCache>,
    in_flight: Arc<Mutex<Waiters>>,
}

impl Cacher {
    pub fn new(dispatcher: Mailbox, cache: Arc<ResponseCache>) -> Self {
        Self { dispatcher, cache, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

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
        let Some(method) = Method::from_name(&envelope.request.method) else {
            unreachable!("the validator only forwards catalogued methods");
        };

        if !method.is_cacheable() {
            // Pass-through, but still via the dispatcher mailbox so
            // back pressure accounting sees the envelope.
            if let Err(Rejected(envelope)) = self.dispatcher.send(envelope) {
                tracing::error!(method = %method, "dispatcher mailbox rejected envelope");
                let id = envelope.request.id.clone();
                envelope.respond(back_pressure_response(id));
            }
            return;
        }

        let key = CacheKey::of(&envelope.request, envelope.target.as_ref());
        if let Some(mut response) = self.cache.get(&key) {
            // The entry was produced for whichever request populated
            // it; the reply must carry this request's id.
            response.id = envelope.request.id.clone();
            envelope.respond(response);
            return;
        }

        let Envelope { request, target, responder } = envelope;
        let id = request.id.clone();

        {
            let mut in_flight = self.in_flight.lock().expect("cacher in-flight lock poisoned");
            if let Some(waiters) = in_flight.get_mut(&key) {
                waiters.push((id, responder));
                return;
            }
            in_flight.insert(key.clone(), vec![(id.clone(), responder)]);
        }

        let (internal, reply) = Envelope::new(request, target);
        if let Err(Rejected(_)) = self.dispatcher.send(internal) {
            tracing::error!(method = %method, "dispatcher mailbox rejected envelope");
            drain(&self.in_flight, &key, back_pressure_response(id));
            return;
        }

        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let response = match reply.await {
                Ok(response) => response,
                // The dispatcher dropped the envelope without replying;
                // only happens when the pipeline is shutting down.
                Err(_) => back_pressure_response(id),
            };
            cache.insert(key.clone(), response.clone());
            drain(&in_flight, &key, response);
        });
    }
}

/// Hands `response` to every reply channel parked on `key`, stamped
/// with each waiter's own request id.
fn drain(in_flight: &Mutex<Waiters>, key: &CacheKey, response: Response) {
    let waiters = in_flight.lock().expect("cacher in-flight lock poisoned").remove(key).unwrap_or_default();
    for (id, waiter) in waiters {
        let mut response = response.clone();
        response.id = id;
        let _ = waiter.send(response);
    }
}
