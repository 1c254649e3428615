//! Process-wide provider schema cache.
//!
//! Schemas are cached per provider address once the provider advertises
//! `get_provider_schema_optional`. Concurrent first fetches for the same
//! address are serialized on a per-address lock so only one of them reaches
//! the provider.

use crate::addrs::ProviderAddr;
use crate::diagnostics::Diagnostics;
use crate::schema::ProviderSchema;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

type Slot = Arc<tokio::sync::Mutex<Option<Arc<ProviderSchema>>>>;

/// Schema cache keyed by provider address.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    slots: Mutex<HashMap<ProviderAddr, Slot>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every provider in this process.
    pub fn global() -> Arc<SchemaRegistry> {
        static GLOBAL: OnceLock<Arc<SchemaRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(SchemaRegistry::new())).clone()
    }

    fn slot(&self, addr: &ProviderAddr) -> Slot {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entry(addr.clone()).or_default().clone()
    }

    /// A cached schema, if one is present and no fetch is in flight.
    pub fn get(&self, addr: &ProviderAddr) -> Option<Arc<ProviderSchema>> {
        let slot = self.slot(addr);
        let cached = slot.try_lock().ok()?.clone();
        cached
    }

    /// Store a schema unconditionally.
    pub async fn insert(&self, addr: &ProviderAddr, schema: Arc<ProviderSchema>) {
        let slot = self.slot(addr);
        *slot.lock().await = Some(schema);
    }

    /// Return the cached schema for `addr`, or run `fetch` to obtain it.
    ///
    /// `fetch` runs at most once at a time per address. Its result is cached
    /// only if it carries no errors and the provider marked it cacheable.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        addr: &ProviderAddr,
        fetch: F,
    ) -> (Option<Arc<ProviderSchema>>, Diagnostics)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (Option<ProviderSchema>, Diagnostics)>,
    {
        let slot = self.slot(addr);
        let mut guard = slot.lock().await;
        if let Some(schema) = guard.as_ref() {
            debug!(provider = %addr, "provider schema cache hit");
            return (Some(schema.clone()), Diagnostics::new());
        }

        let (schema, diagnostics) = fetch().await;
        let Some(schema) = schema else {
            return (None, diagnostics);
        };
        let schema = Arc::new(schema);
        if !diagnostics.has_errors() && schema.capabilities.get_provider_schema_optional {
            debug!(provider = %addr, "caching provider schema");
            *guard = Some(schema.clone());
        }
        (Some(schema), diagnostics)
    }

    /// Drop every cached schema.
    pub fn clear(&self) {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostic;
    use crate::schema::ServerCapabilities;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cacheable() -> ProviderSchema {
        ProviderSchema::new().with_capabilities(ServerCapabilities {
            get_provider_schema_optional: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_cacheable_schema_fetched_once() {
        let registry = SchemaRegistry::new();
        let addr = ProviderAddr::new("hemmer", "test");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let (schema, diags) = registry
                .get_or_fetch(&addr, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (Some(cacheable()), Diagnostics::new())
                })
                .await;
            assert!(schema.is_some());
            assert!(diags.is_empty());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.get(&addr).is_some());
    }

    #[tokio::test]
    async fn test_uncacheable_or_failed_fetch_not_cached() {
        let registry = SchemaRegistry::new();
        let addr = ProviderAddr::new("hemmer", "test");

        registry
            .get_or_fetch(&addr, || async { (Some(ProviderSchema::new()), Diagnostics::new()) })
            .await;
        assert!(registry.get(&addr).is_none());

        registry
            .get_or_fetch(&addr, || async {
                (Some(cacheable()), Diagnostic::error("boom").into())
            })
            .await;
        assert!(registry.get(&addr).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_fetch_single_flight() {
        let registry = Arc::new(SchemaRegistry::new());
        let addr = ProviderAddr::new("hemmer", "test");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let addr = addr.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .get_or_fetch(&addr, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        (Some(cacheable()), Diagnostics::new())
                    })
                    .await
            }));
        }
        for task in tasks {
            let (schema, _) = task.await.unwrap();
            assert!(schema.is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
