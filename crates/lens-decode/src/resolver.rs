//! Contract ABI resolution with process-wide caching.
//!
//! Each address is fetched at most once while a fetch is in flight: every
//! concurrent caller awaits the same [`OnceCell`]. Successful lookups stay
//! cached for the life of the resolver. Misses are dropped once all waiters
//! have seen them so a later block retries the address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::Address;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::abi::ContractAbi;
use crate::sources::AbiSource;

type Slot = Arc<OnceCell<Option<Arc<ContractAbi>>>>;

/// Resolves contract ABIs from an ordered list of [`AbiSource`]s.
pub struct AbiResolver {
    sources: Vec<Arc<dyn AbiSource>>,
    cache: DashMap<Address, Slot>,
    limiter: Semaphore,
    cancel: CancellationToken,
    fetches: AtomicU64,
}

impl AbiResolver {
    /// `max_concurrent` bounds source calls in flight across all addresses.
    pub fn new(
        sources: Vec<Arc<dyn AbiSource>>,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sources,
            cache: DashMap::new(),
            limiter: Semaphore::new(max_concurrent.max(1)),
            cancel,
            fetches: AtomicU64::new(0),
        }
    }

    /// Seeds the cache with a known ABI.
    pub fn insert(&self, address: Address, abi: ContractAbi) {
        let slot = Arc::new(OnceCell::new_with(Some(Some(Arc::new(abi)))));
        self.cache.insert(address, slot);
    }

    /// Cached ABI for `address` without triggering a fetch.
    pub fn cached(&self, address: Address) -> Option<Arc<ContractAbi>> {
        self.cache
            .get(&address)
            .and_then(|slot| slot.get().cloned().flatten())
    }

    /// Number of source calls issued so far.
    pub fn outbound_fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// ABI for `address`, `None` when no source has one.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, address: Address) -> Option<Arc<ContractAbi>> {
        let slot: Slot = self
            .cache
            .entry(address)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let resolved = slot.get_or_init(|| self.fetch(address)).await.clone();

        if resolved.is_none() {
            self.cache
                .remove_if(&address, |_, current| Arc::ptr_eq(current, &slot));
        }
        resolved
    }

    /// Resolves every address concurrently. Addresses without an ABI are absent from the map.
    pub async fn resolve_many(
        &self,
        addresses: impl IntoIterator<Item = Address>,
    ) -> HashMap<Address, Arc<ContractAbi>> {
        let lookups = addresses
            .into_iter()
            .map(|address| async move { (address, self.resolve(address).await) });
        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(address, abi)| abi.map(|abi| (address, abi)))
            .collect()
    }

    async fn fetch(&self, address: Address) -> Option<Arc<ContractAbi>> {
        for (position, source) in self.sources.iter().enumerate() {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                permit = self.limiter.acquire() => permit,
            };
            let Ok(_permit) = permit else {
                return None;
            };

            self.fetches.fetch_add(1, Ordering::Relaxed);
            let fetched = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                fetched = source.fetch_abi(address) => fetched,
            };

            let json = match fetched {
                Ok(Some(json)) => json,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(%address, source = source.name(), error = %e, "ABI source failed");
                    continue;
                }
            };

            match ContractAbi::parse(&json, source.name()) {
                Ok(abi) if !abi.is_empty() => {
                    tracing::debug!(%address, source = source.name(), "resolved contract ABI");
                    for earlier in &self.sources[..position] {
                        if let Err(e) = earlier.remember(address, &json, source.name()).await {
                            tracing::warn!(%address, source = earlier.name(), error = %e, "failed to remember ABI");
                        }
                    }
                    return Some(Arc::new(abi));
                }
                Ok(_) => tracing::debug!(%address, source = source.name(), "ABI is empty"),
                Err(e) => {
                    tracing::debug!(%address, source = source.name(), error = %e, "ABI did not parse")
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eyre::Result;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    const ABI: &str = r#"[{"type":"function","name":"ping","inputs":[],"outputs":[],"stateMutability":"view"}]"#;

    #[derive(Default)]
    struct CountingSource {
        known: Vec<Address>,
        calls: AtomicUsize,
        remembered: Mutex<Vec<Address>>,
    }

    #[async_trait]
    impl AbiSource for CountingSource {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn fetch_abi(&self, address: Address) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.known.contains(&address).then(|| ABI.to_string()))
        }

        async fn remember(&self, address: Address, _abi_json: &str, _source: &str) -> Result<()> {
            self.remembered.lock().expect("lock").push(address);
            Ok(())
        }
    }

    fn resolver(sources: Vec<Arc<dyn AbiSource>>) -> AbiResolver {
        AbiResolver::new(sources, 4, CancellationToken::new())
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let known = Address::repeat_byte(0x01);
        let source = Arc::new(CountingSource {
            known: vec![known],
            ..Default::default()
        });
        let resolver = resolver(vec![source.clone()]);

        let results = join_all((0..8).map(|_| resolver.resolve(known))).await;
        assert!(results.iter().all(Option::is_some));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Cached from here on.
        assert!(resolver.resolve(known).await.is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.cached(known).is_some());
    }

    #[tokio::test]
    async fn misses_are_retried_later() {
        let unknown = Address::repeat_byte(0x02);
        let source = Arc::new(CountingSource::default());
        let resolver = resolver(vec![source.clone()]);

        assert!(resolver.resolve(unknown).await.is_none());
        assert!(resolver.resolve(unknown).await.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.outbound_fetches(), 2);
    }

    #[tokio::test]
    async fn later_source_result_is_offered_to_earlier_sources() {
        let address = Address::repeat_byte(0x03);
        let local = Arc::new(CountingSource::default());
        let remote = Arc::new(CountingSource {
            known: vec![address],
            ..Default::default()
        });
        let resolver = resolver(vec![local.clone(), remote.clone()]);

        let abi = resolver.resolve(address).await.expect("remote has it");
        assert_eq!(abi.source(), "counting");
        assert_eq!(*local.remembered.lock().expect("lock"), vec![address]);
        assert!(remote.remembered.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn cancelled_resolver_returns_nothing() {
        let address = Address::repeat_byte(0x04);
        let source = Arc::new(CountingSource {
            known: vec![address],
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let resolver = AbiResolver::new(vec![source.clone()], 4, cancel.clone());
        cancel.cancel();

        assert!(resolver.resolve(address).await.is_none());
        assert!(resolver.cached(address).is_none());
    }

    #[tokio::test]
    async fn seeded_abi_skips_sources() {
        let address = Address::repeat_byte(0x05);
        let source = Arc::new(CountingSource::default());
        let resolver = resolver(vec![source.clone()]);
        resolver.insert(address, ContractAbi::parse(ABI, "seed").expect("abi"));

        let abi = resolver.resolve(address).await.expect("seeded");
        assert_eq!(abi.source(), "seed");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let many = resolver.resolve_many([address, Address::repeat_byte(0x06)]).await;
        assert_eq!(many.len(), 1);
    }
}
