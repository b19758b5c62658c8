//! Aggregation of fan-out replies into a single response.
//!
//! An [`Aggregator`] is a stateful reducer fed back-end responses in
//! arrival order, with a flag marking the last reply. `update`
//! returning `Some` terminates the fan-out; on the last reply it
//! always produces an aggregate. The set of policies is closed, so it
//! is a plain enum rather than a trait object.

use std::collections::HashMap;

use lg_jsonrpc::{codes, ErrorObject, Method, Response};
use serde_json::Value;

pub enum Aggregator {
    /// The first reply wins, error or not.
    FirstResponse,
    /// The modal reply wins once it holds a strict majority of the
    /// target list; a tie on the final reply does not resolve and
    /// becomes a "no quorum" error.
    Majority { id: Value, target_count: usize, tally: HashMap<String, (usize, Response)> },
    /// The first non-error reply wins; if every target failed, a
    /// synthesized forwarding error is returned.
    AllOrError { id: Value },
}

impl Aggregator {
    /// The aggregation policy used for `method` over `target_count`
    /// parallel calls. `id` is echoed in synthesized error responses.
    pub fn for_method(method: Method, id: Value, target_count: usize) -> Self {
        match method {
            Method::SubmitTx => Aggregator::Majority { id, target_count, tally: HashMap::new() },
            Method::QueryTx => Aggregator::AllOrError { id },
            _ => Aggregator::FirstResponse,
        }
    }

    /// Feeds one reply; `last` marks the final reply of the fan-out.
    /// Returns the aggregate response as soon as it is decided.
    pub fn update(&mut self, response: Response, last: bool) -> Option<Response> {
        match self {
            Aggregator::FirstResponse => Some(response),

            Aggregator::Majority { id, target_count, tally } => {
                let key = serde_json::to_string(&(&response.result, &response.error))
                    .expect("a response always serializes");
                let (count, sample) = tally.entry(key).or_insert((0, response));
                *count += 1;

                if *count * 2 > *target_count {
                    return Some(sample.clone());
                }
                if !last {
                    return None;
                }

                // Final reply without a quorum: the unique modal
                // response wins, a tie does not resolve.
                let max = tally.values().map(|(count, _)| *count).max().unwrap_or(0);
                let mut modal = tally.values().filter(|(count, _)| *count == max);
                match (modal.next(), modal.next()) {
                    (Some((_, response)), None) => Some(response.clone()),
                    _ => Some(Response::error(
                        id.clone(),
                        ErrorObject::new(codes::FORWARDING_ERROR, "no quorum among node responses"),
                    )),
                }
            }

            Aggregator::AllOrError { id } => {
                if !response.is_error() {
                    return Some(response);
                }
                if last {
                    return Some(Response::error(
                        id.clone(),
                        ErrorObject::new(codes::FORWARDING_ERROR, "all target nodes returned errors"),
                    ));
                }
                None
            }
        }
    }
}
