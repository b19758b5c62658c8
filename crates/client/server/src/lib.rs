//! The ingress HTTP server.
//!
//! Accepts single or batched JSON-RPC 2.0 requests over `POST /`,
//! enforces the batch-size cap, the per-(method, host) rate limit and
//! the per-batch deadline, then pairs every request with a one-shot
//! reply channel and submits it to the validator's mailbox. Batch
//! slots are processed in parallel but the response array always
//! preserves input order. `GET /health` answers liveness probes.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use lg_jsonrpc::{codes, ErrorObject, Method, Request, Response};
use lg_pipeline::{Envelope, Mailbox, Rejected};
use lg_store::NodeId;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};

pub mod rate_limit;

pub use rate_limit::{RateLimit, RateLimiter, RateLimits};

#[cfg(test)]
mod tests;

const DEFAULT_MAX_BATCH_SIZE: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long in-flight connections get to drain after shutdown begins.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Options used when constructing a [`GatewayServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Batches larger than this are rejected outright.
    pub max_batch_size: usize,
    /// Wall-clock deadline for every request of a batch.
    pub timeout: Duration,
    /// Per-method rate limits, keyed by client host at runtime.
    pub rate_limits: RateLimits,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            rate_limits: RateLimits::default(),
        }
    }
}

/// The ingress HTTP server. Cheap to clone; all shared state sits
/// behind handles.
#[derive(Clone)]
pub struct GatewayServer {
    config: ServerConfig,
    rate_limiter: Arc<RateLimiter>,
    validator: Mailbox,
}

impl GatewayServer {
    /// `validator` is the mailbox of the first pipeline stage.
    pub fn new(config: ServerConfig, validator: Mailbox) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        Self { config, rate_limiter, validator }
    }

    /// Binds the configured port and serves until `token` is
    /// cancelled.
    pub async fn listen(self, token: CancellationToken) -> anyhow::Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
        let listener = TcpListener::bind(addr).await.with_context(|| format!("opening listener on {addr}"))?;
        self.serve(listener, token).await
    }

    /// Serves connections from an already-bound listener until `token`
    /// is cancelled, then drains in-flight connections up to the
    /// shutdown deadline.
    pub async fn serve(self, listener: TcpListener, token: CancellationToken) -> anyhow::Result<()> {
        let addr = listener.local_addr().context("reading listener address")?;
        tracing::info!("🌐 gateway endpoint started at {addr}");

        let tracker = TaskTracker::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(error = %err, "error accepting connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let server = self.clone();

                    tracker.spawn(async move {
                        let service = ServiceBuilder::new()
                            .layer(CatchPanicLayer::new())
                            .layer(cors())
                            .service(tower::service_fn(move |req: hyper::Request<Incoming>| {
                                let server = server.clone();
                                async move { Ok::<_, Infallible>(server.route(remote, req).await) }
                            }));

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, TowerToHyperService::new(service))
                            .await
                        {
                            tracing::debug!(error = %err, "error serving connection");
                        }
                    });
                }

                _ = token.cancelled() => break,
            }
        }

        tracker.close();
        if tokio::time::timeout(SHUTDOWN_DEADLINE, tracker.wait()).await.is_err() {
            tracing::warn!("shutdown deadline exceeded with connections still in flight");
        }
        Ok(())
    }

    async fn route(self, remote: SocketAddr, req: hyper::Request<Incoming>) -> hyper::Response<Full<Bytes>> {
        let (method, path) = (req.method().clone(), req.uri().path());
        if method == hyper::Method::GET && path == "/health" {
            empty_response(StatusCode::OK)
        } else if method == hyper::Method::POST && path == "/" {
            self.handle_rpc(remote, req).await
        } else {
            empty_response(StatusCode::NOT_FOUND)
        }
    }

    async fn handle_rpc(self, remote: SocketAddr, req: hyper::Request<Incoming>) -> hyper::Response<Full<Bytes>> {
        // `?id=` pins every request of the batch to one back-end node.
        let target = target_hint(req.uri().query());

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::debug!(error = %err, "error reading request body");
                return write_responses(vec![parse_error()]);
            }
        };

        let requests = match decode_batch(&body) {
            Some(requests) => requests,
            None => return write_responses(vec![parse_error()]),
        };

        if requests.len() > self.config.max_batch_size {
            let message = format!(
                "maximum batch size exceeded: maximum is {} but got {}",
                self.config.max_batch_size,
                requests.len()
            );
            let error = ErrorObject::new(codes::MAX_BATCH_SIZE_EXCEEDED, message);
            return write_responses(vec![Response::error(Value::Null, error)]);
        }

        // One task per batch slot; the deadline is batch-wide.
        let deadline = Instant::now() + self.config.timeout;
        let host = remote.ip().to_string();
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let id = request.id.clone();
                let task = self.clone().process_one(request, target.clone(), host.clone(), deadline);
                (id, tokio::spawn(task))
            })
            .collect();

        let mut responses = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let response = match handle.await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(error = %err, "request task failed");
                    Response::error(id, ErrorObject::new(codes::INTERNAL, "internal error processing request"))
                }
            };
            responses.push(response);
        }

        write_responses(responses)
    }

    /// Runs a single batch slot to completion: policy checks, then
    /// submission to the validator and the wait for whichever comes
    /// first of the reply and the deadline.
    async fn process_one(
        self,
        request: Request,
        target: Option<NodeId>,
        host: String,
        deadline: Instant,
    ) -> Response {
        let id = request.id.clone();

        // The method must exist before the rate limit is consulted, so
        // unknown-method abuse cannot drain a client's budget.
        let Some(method) = Method::from_name(&request.method) else {
            return Response::error(id, ErrorObject::unsupported_method(&request.method));
        };

        if !self.rate_limiter.allow(method, &host) {
            return Response::error(id, ErrorObject::rate_limited());
        }

        let (envelope, reply) = Envelope::new(request, target);
        if let Err(Rejected(_)) = self.validator.send(envelope) {
            tracing::error!(method = %method, "validator mailbox rejected request");
            let error =
                ErrorObject::new(codes::INTERNAL, "failed to send request to the validator, too much back pressure in the gateway");
            return Response::error(id, error);
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let message = format!("timeout for request id={id}, method={method}");
                Response::error(id, ErrorObject::new(codes::TIMEOUT, message))
            }
            received = reply => match received {
                Ok(response) => response,
                // A dropped reply channel means a pipeline stage died.
                Err(_) => Response::error(id, ErrorObject::new(codes::INTERNAL, "request pipeline dropped the reply channel")),
            }
        }
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods([hyper::Method::POST]).allow_headers(Any)
}

/// Decodes the body as a batch, falling back to a single request
/// wrapped in a one-element batch. `None` means undecodable JSON.
fn decode_batch(body: &[u8]) -> Option<Vec<Request>> {
    if let Ok(requests) = serde_json::from_slice::<Vec<Request>>(body) {
        return Some(requests);
    }
    serde_json::from_slice::<Request>(body).ok().map(|request| vec![request])
}

fn target_hint(query: Option<&str>) -> Option<NodeId> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "id")
        .map(|(_, value)| NodeId(value.into_owned()))
        .filter(|id| !id.0.is_empty())
}

fn parse_error() -> Response {
    Response::error(Value::Null, ErrorObject::new(codes::PARSE_ERROR, "could not parse JSON request"))
}

/// The HTTP status carried by a sole error response.
fn status_for(code: i64) -> StatusCode {
    match code {
        codes::PARSE_ERROR | codes::INVALID_REQUEST | codes::INVALID_PARAMS | codes::MAX_BATCH_SIZE_EXCEEDED => {
            StatusCode::BAD_REQUEST
        }
        codes::METHOD_NOT_FOUND | codes::RESULT_NOT_FOUND => StatusCode::NOT_FOUND,
        codes::RATE_LIMIT_EXCEEDED => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A single-element batch collapses to a bare object and derives its
/// status from the error code; anything else is an array under 200.
fn write_responses(responses: Vec<Response>) -> hyper::Response<Full<Bytes>> {
    match responses.as_slice() {
        [response] => {
            let status = match &response.error {
                Some(error) => status_for(error.code),
                None => StatusCode::OK,
            };
            json_response(status, response)
        }
        _ => json_response(StatusCode::OK, &responses),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> hyper::Response<Full<Bytes>> {
    let body = match serde_json::to_vec(body) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, "error serializing response body");
            return empty_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    hyper::Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("a response with a valid status and header always builds")
}

fn empty_response(status: StatusCode) -> hyper::Response<Full<Bytes>> {
    hyper::Response::builder()
        .status(status)
        .body(Full::default())
        .expect("a response with a valid status always builds")
}
