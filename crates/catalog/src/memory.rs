//! In-memory service provider for tests and simulated hosts
//!
//! Backs `service` resources with a mutex-guarded table instead of a real
//! supervisor. Supports injecting change failures and latency so engine
//! behavior (skip propagation, timeouts) can be exercised hermetically.

use crate::provider::{LiveState, Provider};
use crate::report::AttrDiff;
use crate::resource::{Desired, ServiceEnsure};
use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Simulated run/boot state of one service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub running: bool,
    pub enabled: bool,
}

/// A `service` provider over an in-memory table
///
/// Unknown titles read as stopped and disabled; a change materializes the
/// record. All interior mutability is behind mutexes so the provider can be
/// shared across the engine's worker pool.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    services: Mutex<BTreeMap<String, ServiceRecord>>,
    deny_changes: Mutex<BTreeSet<String>>,
    change_delay: Mutex<Option<Duration>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a service record
    pub fn with_service(self, title: &str, running: bool, enabled: bool) -> Self {
        self.services
            .lock()
            .unwrap()
            .insert(title.to_string(), ServiceRecord { running, enabled });
        self
    }

    /// Make every change to `title` fail
    pub fn deny_change(&self, title: &str) {
        self.deny_changes.lock().unwrap().insert(title.to_string());
    }

    /// Delay every change by `delay` (for timeout tests)
    pub fn set_change_delay(&self, delay: Duration) {
        *self.change_delay.lock().unwrap() = Some(delay);
    }

    /// Observe the stored record, if the service was ever materialized
    pub fn record(&self, title: &str) -> Option<ServiceRecord> {
        self.services.lock().unwrap().get(title).copied()
    }
}

impl Provider for MemoryProvider {
    fn rtype(&self) -> &'static str {
        "service"
    }

    fn read(&self, title: &str) -> Result<LiveState> {
        let record = self.record(title).unwrap_or_default();
        Ok(LiveState::new()
            .with(
                "ensure",
                if record.running { "running" } else { "stopped" },
            )
            .with("enable", record.enabled))
    }

    fn change(&self, title: &str, desired: &Desired, diff: &AttrDiff) -> Result<()> {
        if let Some(delay) = *self.change_delay.lock().unwrap() {
            thread::sleep(delay);
        }
        if self.deny_changes.lock().unwrap().contains(title) {
            bail!("change denied for service `{title}`");
        }

        let Desired::Service { ensure, enable } = desired;
        let mut services = self.services.lock().unwrap();
        let record = services.entry(title.to_string()).or_default();

        for change in diff.changes() {
            match change.attribute.as_str() {
                "ensure" => record.running = matches!(ensure, ServiceEnsure::Running),
                "enable" => {
                    if let Some(enable) = enable {
                        record.enabled = *enable;
                    }
                }
                other => bail!("service provider cannot change attribute `{other}`"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AttrChange;
    use crate::resource::Scalar;

    #[test]
    fn test_unknown_service_reads_stopped_disabled() {
        let provider = MemoryProvider::new();
        let live = provider.read("ghost").unwrap();
        assert_eq!(live.get("ensure"), Some(&Scalar::Str("stopped".into())));
        assert_eq!(live.get("enable"), Some(&Scalar::Bool(false)));
    }

    #[test]
    fn test_change_only_touches_diffed_attributes() {
        let provider = MemoryProvider::new().with_service("svc", false, true);
        let desired = Desired::Service {
            ensure: ServiceEnsure::Running,
            enable: Some(false),
        };
        // Diff names only `ensure`; `enable` must stay untouched
        let mut diff = AttrDiff::new();
        diff.push(AttrChange {
            attribute: "ensure".into(),
            before: Some(Scalar::Str("stopped".into())),
            after: Scalar::Str("running".into()),
        });

        provider.change("svc", &desired, &diff).unwrap();
        let record = provider.record("svc").unwrap();
        assert!(record.running);
        assert!(record.enabled);
    }

    #[test]
    fn test_denied_change_fails() {
        let provider = MemoryProvider::new();
        provider.deny_change("svc");
        let desired = Desired::Service {
            ensure: ServiceEnsure::Running,
            enable: None,
        };
        let mut diff = AttrDiff::new();
        diff.push(AttrChange {
            attribute: "ensure".into(),
            before: None,
            after: Scalar::Str("running".into()),
        });
        assert!(provider.change("svc", &desired, &diff).is_err());
    }
}
