//! Provider trait and registry
//!
//! Providers are the seam between the convergence engine and the host:
//! one per resource type, able to read live state and issue the minimal
//! change set. The engine owns diffing, ordering, timeouts, and reporting;
//! providers only touch the system.

use crate::report::AttrDiff;
use crate::resource::{Desired, Scalar};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Attributes observed on the host for one resource, read immediately
/// before diffing so the engine never acts on stale data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveState {
    attributes: BTreeMap<String, Scalar>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, attribute: &str, value: impl Into<Scalar>) {
        self.attributes.insert(attribute.to_string(), value.into());
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, attribute: &str, value: impl Into<Scalar>) -> Self {
        self.set(attribute, value);
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&Scalar> {
        self.attributes.get(attribute)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Scalar> {
        &self.attributes
    }
}

/// State access for one resource type
///
/// Implementations must be cheap to clone behind an `Arc` and safe to call
/// from the engine's worker pool. Both operations run under the engine's
/// per-operation timeout.
pub trait Provider: Send + Sync {
    /// Resource type this provider manages (e.g. `"service"`)
    fn rtype(&self) -> &'static str;

    /// Observe the current live state of the titled resource
    fn read(&self, title: &str) -> Result<LiveState>;

    /// Issue the minimal changes named by `diff` to reach `desired`
    ///
    /// Attributes absent from `diff` already match and must not be touched.
    fn change(&self, title: &str, desired: &Desired, diff: &AttrDiff) -> Result<()>;
}

/// Providers keyed by resource type
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// An empty registry; callers register providers explicitly
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in host providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::systemd::SystemdProvider::new()));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.rtype().to_string(), provider);
    }

    pub fn get(&self, rtype: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(rtype).cloned()
    }
}

/// A provider operation exceeded its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Elapsed;

/// Run a provider operation on a helper thread, bounded by `timeout`
///
/// On expiry the helper thread is left to finish on its own; the engine
/// treats the operation as atomic and never cancels it mid-flight.
pub(crate) fn run_with_timeout<T: Send + 'static>(
    timeout: Duration,
    operation: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<Result<T>, Elapsed> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(operation());
    });
    rx.recv_timeout(timeout).map_err(|_| Elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_timeout_returns_result() {
        let out = run_with_timeout(Duration::from_secs(1), || Ok(42)).unwrap();
        assert_eq!(out.unwrap(), 42);
    }

    #[test]
    fn test_run_with_timeout_expires() {
        let out = run_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        assert_eq!(out.unwrap_err(), Elapsed);
    }

    #[test]
    fn test_registry_lookup_by_type() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.get("service").is_some());
        assert!(registry.get("package").is_none());
    }
}
