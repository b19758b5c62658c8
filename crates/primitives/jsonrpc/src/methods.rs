//! The closed catalog of methods routed by the gateway, together with
//! the structural parameter schema of each method.
//!
//! Validation is shape-only: a parameter object is accepted iff it
//! deserializes into the method's schema. Values are never inspected;
//! semantic checks belong to the back-end nodes.

use serde::Deserialize;
use serde_json::Value;

/// A method the gateway knows how to route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    QueryBlock,
    QueryBlocks,
    QueryNumPeers,
    QueryPeers,
    QueryEpoch,
    QueryStat,
    SubmitTx,
    QueryTx,
}

/// A request's parameters do not match the method's schema.
#[derive(Debug, thiserror::Error)]
#[error("parameters object does not match method")]
pub struct ParamsError(#[source] serde_json::Error);

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct QueryBlockParams {
    #[serde(default)]
    #[allow(dead_code)]
    block_height: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryBlocksParams {
    #[serde(default)]
    #[allow(dead_code)]
    n: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyParams {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SubmitTxParams {
    #[allow(dead_code)]
    tx: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct QueryTxParams {
    #[allow(dead_code)]
    tx_hash: String,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::QueryBlock,
        Method::QueryBlocks,
        Method::QueryNumPeers,
        Method::QueryPeers,
        Method::QueryEpoch,
        Method::QueryStat,
        Method::SubmitTx,
        Method::QueryTx,
    ];

    /// Resolves a wire-level method name, `None` for anything outside
    /// the catalog.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ren_queryBlock" => Some(Method::QueryBlock),
            "ren_queryBlocks" => Some(Method::QueryBlocks),
            "ren_queryNumPeers" => Some(Method::QueryNumPeers),
            "ren_queryPeers" => Some(Method::QueryPeers),
            "ren_queryEpoch" => Some(Method::QueryEpoch),
            "ren_queryStat" => Some(Method::QueryStat),
            "ren_submitTx" => Some(Method::SubmitTx),
            "ren_queryTx" => Some(Method::QueryTx),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::QueryBlock => "ren_queryBlock",
            Method::QueryBlocks => "ren_queryBlocks",
            Method::QueryNumPeers => "ren_queryNumPeers",
            Method::QueryPeers => "ren_queryPeers",
            Method::QueryEpoch => "ren_queryEpoch",
            Method::QueryStat => "ren_queryStat",
            Method::SubmitTx => "ren_submitTx",
            Method::QueryTx => "ren_queryTx",
        }
    }

    /// Whether responses for this method may be served from the
    /// response cache. The read-only query family is cacheable; tx
    /// submission and tx status lookups are not.
    pub fn is_cacheable(&self) -> bool {
        match self {
            Method::QueryBlock
            | Method::QueryBlocks
            | Method::QueryNumPeers
            | Method::QueryPeers
            | Method::QueryEpoch
            | Method::QueryStat => true,
            Method::SubmitTx | Method::QueryTx => false,
        }
    }

    /// Structural validation of a request's `params` against this
    /// method's schema. `null` is accepted wherever every field is
    /// optional.
    pub fn validate_params(&self, params: &Value) -> Result<(), ParamsError> {
        fn check<'de, T: Deserialize<'de>>(params: &'de Value) -> Result<(), ParamsError> {
            if params.is_null() {
                return Ok(());
            }
            T::deserialize(params).map(|_| ()).map_err(ParamsError)
        }

        match self {
            Method::QueryBlock => check::<QueryBlockParams>(params),
            Method::QueryBlocks => check::<QueryBlocksParams>(params),
            Method::QueryNumPeers | Method::QueryPeers | Method::QueryEpoch | Method::QueryStat => {
                check::<EmptyParams>(params)
            }
            Method::SubmitTx => {
                if params.is_null() {
                    return Err(ParamsError(serde::de::Error::custom("missing tx object")));
                }
                SubmitTxParams::deserialize(params).map(|_| ()).map_err(ParamsError)
            }
            Method::QueryTx => {
                if params.is_null() {
                    return Err(ParamsError(serde::de::Error::custom("missing txHash")));
                }
                QueryTxParams::deserialize(params).map(|_| ()).map_err(ParamsError)
            }
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
