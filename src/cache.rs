use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::instance_type::InstanceType;
use crate::providers::provider::ProviderError;

struct CacheEntry {
    fetched_at: Instant,
    instance_types: Vec<InstanceType>,
}

/// TTL cache over the provider's instance-type enumeration. Listings move
/// slowly, so one fetch serves many reconcile passes; a stale entry is
/// replaced by whoever fetches next.
pub struct InstanceTypeCache {
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl InstanceTypeCache {
    pub fn new(ttl: Duration) -> Self {
        InstanceTypeCache {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Return the cached listing if it is still fresh, otherwise run `fetch`
    /// and cache its result. Fetch errors are passed through and leave any
    /// stale entry in place for the next attempt.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Vec<InstanceType>, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<InstanceType>, ProviderError>>,
    {
        let mut entry = self.entry.lock().await;
        if let Some(cached) = entry.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.instance_types.clone());
            }
            debug!("instance-type listing expired");
        }
        let instance_types = fetch().await?;
        *entry = Some(CacheEntry {
            fetched_at: Instant::now(),
            instance_types: instance_types.clone(),
        });
        Ok(instance_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::resources::ResourceVector;

    fn listing(name: &str) -> Vec<InstanceType> {
        vec![InstanceType {
            name: name.into(),
            zones: BTreeSet::new(),
            architectures: BTreeSet::new(),
            operating_systems: BTreeSet::new(),
            capacity: ResourceVector::default(),
            overhead: ResourceVector::default(),
            price_per_hour: 0.01,
        }]
    }

    #[tokio::test]
    async fn second_read_within_ttl_hits_the_cache() {
        let cache = InstanceTypeCache::new(Duration::from_secs(600));
        let fetches = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_fetch(|| async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(listing("cx22"))
                })
                .await
                .unwrap();
            assert_eq!(result[0].name, "cx22");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let cache = InstanceTypeCache::new(Duration::ZERO);
        let first = cache
            .get_or_fetch(|| async { Ok(listing("cx22")) })
            .await
            .unwrap();
        assert_eq!(first[0].name, "cx22");

        let second = cache
            .get_or_fetch(|| async { Ok(listing("cx32")) })
            .await
            .unwrap();
        assert_eq!(second[0].name, "cx32");
    }

    #[tokio::test]
    async fn fetch_error_is_passed_through() {
        let cache = InstanceTypeCache::new(Duration::from_secs(600));
        let result = cache
            .get_or_fetch(|| async {
                Err(ProviderError::CreationFailed {
                    message: "api down".into(),
                })
            })
            .await;
        assert!(result.is_err());

        // a later successful fetch still populates the cache
        let result = cache
            .get_or_fetch(|| async { Ok(listing("cx22")) })
            .await
            .unwrap();
        assert_eq!(result[0].name, "cx22");
    }
}
