//! Verification harness - read-only predicates over catalogs and live state
//!
//! Consumed by tests and the `check` command. None of these mutate the
//! catalog or trigger an apply.

use crate::compile::{Catalog, compile};
use crate::facts::FactStore;
use crate::provider::ProviderRegistry;
use crate::resource::{DeclarationSet, Scalar};
use std::collections::BTreeMap;

/// True iff the declaration set compiles with all dependencies satisfiable:
/// no duplicates, no unresolved references, no cycles, only known types
pub fn compiles_with_all_deps(set: &DeclarationSet, facts: &FactStore) -> bool {
    match compile(set, facts) {
        Ok(_) => true,
        Err(e) => {
            log::debug!("compile predicate failed: {e}");
            false
        }
    }
}

/// True iff the catalog declares `(rtype, title)` and every expected
/// attribute matches its declared desired value
pub fn catalog_contains(
    catalog: &Catalog,
    rtype: &str,
    title: &str,
    expected: &BTreeMap<String, Scalar>,
) -> bool {
    catalog.find(rtype, title).is_some_and(|node| {
        let attrs = node.desired.attributes();
        expected.iter().all(|(k, v)| attrs.get(k) == Some(v))
    })
}

/// True iff the provider for `rtype` observes `(rtype, title)` with every
/// expected attribute matching its live value
pub fn live_contains(
    providers: &ProviderRegistry,
    rtype: &str,
    title: &str,
    expected: &BTreeMap<String, Scalar>,
) -> bool {
    let Some(provider) = providers.get(rtype) else {
        return false;
    };
    match provider.read(title) {
        Ok(live) => expected.iter().all(|(k, v)| live.get(k) == Some(v)),
        Err(e) => {
            log::debug!("live predicate failed to read {rtype}[{title}]: {e:#}");
            false
        }
    }
}
