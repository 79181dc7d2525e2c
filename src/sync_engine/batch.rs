//! Batch construction and response classification

use std::collections::{HashMap, VecDeque};
use tracing::warn;

use crate::domain::errors::RemoteCallError;
use crate::domain::listing::{Classification, Outcome, RemoteItemResult};

/// Pops up to `max` non-deferred ids from the front of `pending`.
///
/// Deferred ids are dropped from the queue; they are not retried this run.
pub fn take_batch<F>(pending: &mut VecDeque<String>, max: usize, mut is_deferred: F) -> Vec<String>
where
    F: FnMut(&str) -> bool,
{
    let mut batch = Vec::with_capacity(max.min(pending.len()));
    while batch.len() < max {
        let Some(item_id) = pending.pop_front() else {
            break;
        };
        if !is_deferred(&item_id) {
            batch.push(item_id);
        }
    }
    batch
}

/// Classified outcome of one remote batch call, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub outcomes: Vec<Outcome>,
}

impl BatchOutcome {
    fn ids_with(&self, classification: Classification) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.classification == classification)
            .map(|outcome| outcome.item_id.clone())
            .collect()
    }

    pub fn succeeded_ids(&self) -> Vec<String> {
        self.ids_with(Classification::Success)
    }

    pub fn rate_limited_ids(&self) -> Vec<String> {
        self.ids_with(Classification::RateLimited)
    }

    pub fn failed(&self) -> Vec<&Outcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.classification == Classification::Failure)
            .collect()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.classification == Classification::RateLimited)
    }
}

/// Turns a remote response into one outcome per batch item.
///
/// - `success = true` is a Success whatever the error code says (already ended
///   listings reconcile normally)
/// - a failure whose code is a rate limit code is RateLimited
/// - batch items missing from the response are Failures
/// - a whole-call error fails every item, or rate limits every item when the
///   call itself was throttled
pub fn classify_batch<F>(
    batch: &[String],
    response: Result<Vec<RemoteItemResult>, RemoteCallError>,
    is_rate_limit_code: F,
) -> BatchOutcome
where
    F: Fn(&str) -> bool,
{
    let results = match response {
        Ok(results) => results,
        Err(error) => {
            let (classification, code) = match &error {
                RemoteCallError::RateLimited { code } => (Classification::RateLimited, Some(code.clone())),
                RemoteCallError::Rejected { code, .. } => (Classification::Failure, Some(code.clone())),
                _ => (Classification::Failure, None),
            };
            warn!("⚠️ Batch of {} failed as a whole: {}", batch.len(), error);
            return BatchOutcome {
                outcomes: batch
                    .iter()
                    .map(|item_id| Outcome {
                        item_id: item_id.clone(),
                        classification,
                        error_code: code.clone(),
                    })
                    .collect(),
            };
        }
    };

    let mut by_id: HashMap<&str, &RemoteItemResult> = HashMap::with_capacity(results.len());
    for result in &results {
        if batch.iter().any(|item_id| *item_id == result.item_id) {
            by_id.entry(result.item_id.as_str()).or_insert(result);
        } else {
            warn!("⚠️ Ignoring result for unknown item {}", result.item_id);
        }
    }

    let outcomes = batch
        .iter()
        .map(|item_id| match by_id.get(item_id.as_str()) {
            Some(result) if result.success => Outcome {
                item_id: item_id.clone(),
                classification: Classification::Success,
                error_code: result.error_code.clone(),
            },
            Some(result) => {
                let throttled = result
                    .error_code
                    .as_deref()
                    .is_some_and(|code| is_rate_limit_code(code));
                Outcome {
                    item_id: item_id.clone(),
                    classification: if throttled {
                        Classification::RateLimited
                    } else {
                        Classification::Failure
                    },
                    error_code: result.error_code.clone(),
                }
            }
            None => Outcome {
                item_id: item_id.clone(),
                classification: Classification::Failure,
                error_code: Some("missing_result".to_string()),
            },
        })
        .collect();

    BatchOutcome { outcomes }
}
