//! Per-client memoization of method contracts.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tether_types::{ApiDescriptor, MethodContract, MethodId};
use tracing::debug;

use crate::error::RestError;

/// Derives contracts from an API description.
pub trait ContractSource: Send + Sync {
    /// Contract for `id`, or `None` when the API has no such method.
    fn describe(&self, id: &MethodId) -> Option<MethodContract>;
}

/// [`ContractSource`] over an [`ApiDescriptor`] and a fixed base URL.
#[derive(Debug, Clone)]
pub struct DescriptorSource {
    api: ApiDescriptor,
    base_url: String,
}

impl DescriptorSource {
    pub fn new(api: ApiDescriptor, base_url: impl Into<String>) -> Self {
        Self {
            api,
            base_url: base_url.into(),
        }
    }
}

impl ContractSource for DescriptorSource {
    fn describe(&self, id: &MethodId) -> Option<MethodContract> {
        self.api.contract_for(&self.base_url, id)
    }
}

/// Resolves each method's contract once and hands out shared copies.
///
/// Entries are never invalidated. When two callers race on the first
/// resolution of a method, the first insert wins and both get that value.
pub struct MethodContractCache {
    source: Arc<dyn ContractSource>,
    entries: RwLock<HashMap<MethodId, Arc<MethodContract>>>,
    derivations: AtomicUsize,
}

impl MethodContractCache {
    pub fn new(source: Arc<dyn ContractSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            derivations: AtomicUsize::new(0),
        }
    }

    /// Cached contract for `id`, deriving it on first use.
    ///
    /// # Errors
    /// [`RestError::UnknownMethod`] when the source has no such method.
    pub fn resolve(&self, id: &MethodId) -> Result<Arc<MethodContract>, RestError> {
        if let Some(contract) = self.entries.read().expect("contract cache lock").get(id) {
            return Ok(Arc::clone(contract));
        }

        let derived = self.source.describe(id).ok_or_else(|| RestError::UnknownMethod(id.clone()))?;
        self.derivations.fetch_add(1, Ordering::Relaxed);
        debug!(method = %id, params = derived.params.len(), "method contract derived");

        let mut entries = self.entries.write().expect("contract cache lock");
        Ok(Arc::clone(entries.entry(id.clone()).or_insert_with(|| Arc::new(derived))))
    }

    /// How many times the source was consulted successfully.
    pub fn derivation_count(&self) -> usize {
        self.derivations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("contract cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MethodContractCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodContractCache")
            .field("entries", &self.len())
            .field("derivations", &self.derivation_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tether_types::MethodDescriptor;

    fn cache() -> MethodContractCache {
        let api = ApiDescriptor::new("Exchange")
            .with_path("/api")
            .with_method(MethodDescriptor::get("account", "/account"));
        MethodContractCache::new(Arc::new(DescriptorSource::new(api, "http://h")))
    }

    #[test]
    fn second_resolution_hits_the_cache() {
        let cache = cache();
        let id = MethodId::new("account");
        let first = cache.resolve(&id).unwrap();
        let second = cache.resolve(&id).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
        assert_eq!(cache.derivation_count(), 1);
        assert_eq!(first.path_template(), "/api/account");
    }

    #[test]
    fn unknown_method_is_an_error() {
        let error = cache().resolve(&MethodId::new("nope")).unwrap_err();
        assert!(matches!(error, RestError::UnknownMethod(ref id) if id.as_str() == "nope"));
    }

    #[test]
    fn concurrent_first_resolutions_agree() {
        let cache = Arc::new(cache());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.resolve(&MethodId::new("account")).unwrap())
            })
            .collect();
        let contracts: Vec<Arc<MethodContract>> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        assert_eq!(cache.len(), 1);
        let cached = cache.resolve(&MethodId::new("account")).unwrap();
        assert!(contracts.iter().all(|contract| **contract == *cached));
    }
}
