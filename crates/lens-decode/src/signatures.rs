//! Textual signature hints for selectors and topics no ABI covers.
//!
//! Hints only name things: they never produce decoded parameters.

use std::collections::HashMap;

use alloy::primitives::{Selector, B256};
use async_trait::async_trait;
use dashmap::DashMap;
use eyre::{Context, Result};
use futures::future::join_all;
use serde::Deserialize;

/// Signatures keyed by method selector and event topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureHints {
    pub functions: HashMap<Selector, String>,
    pub events: HashMap<B256, String>,
}

impl SignatureHints {
    pub fn function(&self, selector: Selector) -> Option<&str> {
        self.functions.get(&selector).map(String::as_str)
    }

    pub fn event(&self, topic: B256) -> Option<&str> {
        self.events.get(&topic).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.events.is_empty()
    }
}

/// Batch signature lookup.
#[async_trait]
pub trait SignatureService: Send + Sync {
    async fn lookup(&self, selectors: &[Selector], topics: &[B256]) -> Result<SignatureHints>;
}

/// Signature service that knows nothing, for runs without network hints.
pub struct NoSignatures;

#[async_trait]
impl SignatureService for NoSignatures {
    async fn lookup(&self, _selectors: &[Selector], _topics: &[B256]) -> Result<SignatureHints> {
        Ok(SignatureHints::default())
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    result: LookupResult,
}

#[derive(Debug, Default, Deserialize)]
struct LookupResult {
    #[serde(default)]
    function: HashMap<String, Option<Vec<Candidate>>>,
    #[serde(default)]
    event: HashMap<String, Option<Vec<Candidate>>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    name: String,
    #[serde(default)]
    filtered: bool,
}

/// OpenChain signature database client.
///
/// `GET {base}/signature-database/v1/lookup?function=0x..,0x..&event=0x..&filter=true`.
/// Answers, including misses, are cached for the life of the client.
pub struct OpenChainSignatures {
    client: reqwest::Client,
    base_url: String,
    batch_size: usize,
    functions: DashMap<Selector, Option<String>>,
    events: DashMap<B256, Option<String>>,
}

impl OpenChainSignatures {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, batch_size: usize) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_size: batch_size.max(1),
            functions: DashMap::new(),
            events: DashMap::new(),
        }
    }

    async fn request(&self, kind: &str, keys: Vec<String>) -> Result<LookupResult> {
        let url = format!(
            "{}/signature-database/v1/lookup?{kind}={}&filter=true",
            self.base_url,
            keys.join(",")
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err("signature lookup request failed")?
            .error_for_status()
            .wrap_err("signature lookup rejected")?;
        let body: LookupResponse = response
            .json()
            .await
            .wrap_err("signature lookup returned invalid JSON")?;
        Ok(body.result)
    }
}

#[async_trait]
impl SignatureService for OpenChainSignatures {
    #[tracing::instrument(skip_all, fields(selectors = selectors.len(), topics = topics.len()))]
    async fn lookup(&self, selectors: &[Selector], topics: &[B256]) -> Result<SignatureHints> {
        let missing_functions: Vec<String> = selectors
            .iter()
            .filter(|selector| !self.functions.contains_key(*selector))
            .map(|selector| format!("{selector:#x}"))
            .collect();
        let missing_events: Vec<String> = topics
            .iter()
            .filter(|topic| !self.events.contains_key(*topic))
            .map(|topic| format!("{topic:#x}"))
            .collect();

        let mut requests = Vec::new();
        for chunk in missing_functions.chunks(self.batch_size) {
            requests.push(("function", chunk.to_vec()));
        }
        for chunk in missing_events.chunks(self.batch_size) {
            requests.push(("event", chunk.to_vec()));
        }

        let responses = join_all(requests.into_iter().map(|(kind, keys)| async move {
            (kind, keys.clone(), self.request(kind, keys).await)
        }))
        .await;

        for (kind, keys, response) in responses {
            let result = match response {
                Ok(result) => result,
                Err(e) => {
                    // Leave these keys uncached so the next block asks again.
                    tracing::warn!(kind, batch = keys.len(), error = %e, "signature lookup failed");
                    continue;
                }
            };
            for key in &keys {
                if kind == "function" {
                    if let Ok(selector) = key.parse::<Selector>() {
                        self.functions.insert(selector, best_candidate(result.function.get(key)));
                    }
                } else if let Ok(topic) = key.parse::<B256>() {
                    self.events.insert(topic, best_candidate(result.event.get(key)));
                }
            }
        }

        let mut hints = SignatureHints::default();
        for selector in selectors {
            if let Some(Some(name)) = self.functions.get(selector).map(|entry| entry.value().clone()) {
                hints.functions.insert(*selector, name);
            }
        }
        for topic in topics {
            if let Some(Some(name)) = self.events.get(topic).map(|entry| entry.value().clone()) {
                hints.events.insert(*topic, name);
            }
        }
        Ok(hints)
    }
}

/// Prefers unfiltered candidates, then the shortest signature.
fn best_candidate(candidates: Option<&Option<Vec<Candidate>>>) -> Option<String> {
    let candidates = candidates?.as_ref()?;
    candidates
        .iter()
        .filter(|candidate| !candidate.filtered)
        .min_by_key(|candidate| candidate.name.len())
        .or_else(|| candidates.iter().min_by_key(|candidate| candidate.name.len()))
        .map(|candidate| candidate.name.clone())
}
