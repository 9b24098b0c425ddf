//! # Catalog
//!
//! A declarative resource-graph compiler and idempotent applier.
//!
//! This crate provides the core abstractions for declaring desired host
//! state, compiling declarations into a dependency-ordered catalog, and
//! converging live systems to match it.
//!
//! ## Core Concepts
//!
//! - **ResourceDeclaration**: desired state for one `(type, title)` pair
//! - **FactStore**: read-only node attributes supplied by the environment
//! - **Catalog**: the compiled, acyclic dependency graph of desired states
//! - **Provider**: per-type live-state access (read + minimal change)
//! - **RunReport**: ordered per-resource outcomes of one apply
//!
//! ## Example
//!
//! ```ignore
//! use catalog::{
//!     ApplyOptions, DeclarationSet, FactStore, ProviderRegistry,
//!     ResourceDeclaration, apply, compile,
//! };
//!
//! let facts = FactStore::new().with("hostname", "storm.example.org");
//! let set = DeclarationSet::new().with(
//!     ResourceDeclaration::service("backend-server")
//!         .attr("ensure", "running")
//!         .attr("enable", true),
//! );
//!
//! let catalog = compile(&set, &facts)?;
//! let report = apply(&catalog, &ProviderRegistry::with_defaults(), &ApplyOptions::default());
//! assert!(report.is_success());
//! ```
//!
//! ## Semantics
//!
//! Compilation is a pure, deterministic function of declarations and facts;
//! an invalid graph (duplicate identities, unresolved references, cycles,
//! unknown types) fails with a [`CompileError`] and no partial catalog.
//! Application is idempotent: a second run against converged state performs
//! no changes. Per-resource failures are captured in the report and skip
//! dependents without aborting independent subgraphs.

pub mod cache;
pub mod compile;
pub mod engine;
pub mod facts;
pub mod manifest;
pub mod memory;
pub mod provider;
pub mod report;
pub mod resource;
pub mod systemd;
pub mod verify;

// Re-export main types at crate root
pub use cache::CatalogCache;
pub use compile::{Catalog, CatalogNode, CompileError, compile};
pub use engine::{ApplyOptions, DRY_RUN_REASON, apply};
pub use facts::FactStore;
pub use manifest::{Manifest, ManifestError};
pub use memory::MemoryProvider;
pub use provider::{LiveState, Provider, ProviderRegistry};
pub use report::{
    AttrChange, AttrDiff, ConvergenceError, Outcome, ResourceReport, RunReport, RunSummary,
};
pub use resource::{
    DeclarationSet, Desired, ResourceDeclaration, ResourceRef, Scalar, ServiceEnsure,
};
pub use systemd::SystemdProvider;
