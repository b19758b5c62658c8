//! HTTP client used by the dispatcher to forward a single JSON-RPC
//! request to a single back-end node.
//!
//! One call, one POST, one fixed timeout, no retries. Back-end
//! failures are absorbed per-request by the caller; nothing here
//! tracks node health across calls.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::StatusCode;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use lg_jsonrpc::{Request, Response};
use url::Url;

/// A failure to obtain a decoded JSON-RPC response from a node.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("invalid node address {0}")]
    InvalidAddress(Url),
    #[error("error building request: {0}")]
    Http(#[from] hyper::http::Error),
    #[error("error serializing request: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("error sending request: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("node returned http status {0}")]
    BadStatus(StatusCode),
    #[error("error reading response body: {0}")]
    Body(#[source] hyper::Error),
    #[error("error decoding response: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("no response from node within {0:?}")]
    Timeout(Duration),
}

/// Issues one HTTP JSON-RPC call to one back-end node.
#[derive(Clone, Debug)]
pub struct NodeClient {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(timeout: Duration) -> Self {
        Self { client: Client::builder(TokioExecutor::new()).build_http(), timeout }
    }

    /// POSTs `request` to `addr` and decodes the JSON-RPC response.
    ///
    /// Any transport failure, non-2xx status or undecodable body is an
    /// error; the caller decides how a failed node affects the
    /// aggregate response.
    pub async fn send(&self, addr: &Url, request: &Request) -> Result<Response, SendError> {
        let uri: hyper::Uri =
            addr.as_str().parse().map_err(|_| SendError::InvalidAddress(addr.clone()))?;
        let body = serde_json::to_vec(request).map_err(SendError::Serialize)?;
        let req = hyper::Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| SendError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::BadStatus(status));
        }

        let body = response.into_body().collect().await.map_err(SendError::Body)?.to_bytes();
        serde_json::from_slice(&body).map_err(SendError::Deserialize)
    }
}
