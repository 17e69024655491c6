//! Declarative reconciliation planner for Postgres schema objects.
//!
//! Some schema objects are better declared than migrated by hand: functions,
//! views, materialized views, triggers, row security policies, extensions,
//! grants. This crate compares a declared set of such objects against what a
//! target database actually contains and computes the minimal, correctly
//! ordered sequence of create/replace/drop operations to make them match -
//! plus the symmetric reverse sequence to undo the change.
//!
//! The engine is deliberately small and pure: it never connects to a
//! database (observed state arrives through a [`CatalogReader`]), never
//! renders DDL text (the host supplies a [`DdlRenderer`]), and never
//! executes anything. One pass consumes one immutable [`Registry`] and one
//! immutable [`CatalogSnapshot`] and produces one [`Plan`].
//!
//! # Example
//!
//! ```
//! use pg_reconcile::{reconcile, CatalogSnapshot, Entity, Registry};
//!
//! let registry = Registry::register(
//!     [
//!         Entity::view("public", "active_account", "select * from account where active"),
//!         Entity::view("public", "active_account_email", "select email from active_account"),
//!     ],
//!     &[],
//! )?;
//! let snapshot = CatalogSnapshot::from_entities([])?;
//!
//! let plan = reconcile(&registry, &snapshot)?;
//! // dependencies first: active_account is created before the view built on it
//! assert_eq!(plan.len(), 2);
//! # Ok::<(), pg_reconcile::Error>(())
//! ```

mod catalog;
mod diff;
mod entity;
mod error;
mod plan;
mod registry;
mod solver;
mod statement;

pub use catalog::{CatalogReader, CatalogSnapshot};
pub use diff::{classify, compare_observed, ComparisonResult};
pub use entity::{extract_dependencies, Entity, EntityKind, Identity, KindPolicy};
pub use error::Error;
pub use plan::{build_plan, Action, DdlRenderer, Phase, Plan, PlanOperation, ReverseDefinition};
pub use registry::Registry;
pub use solver::{DependencyGraph, EdgeSource};
pub use statement::{coerce_to_quoted, coerce_to_unquoted, normalize, normalize_whitespace};

/// Result type for pg-reconcile operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Run one reconciliation pass: classify, resolve ordering, build the plan.
///
/// Pure and synchronous; multiple passes over different registries and
/// snapshots may run concurrently with no coordination. On any error no
/// partial plan is returned.
pub fn reconcile(registry: &Registry, snapshot: &CatalogSnapshot) -> Result<Plan> {
    let local = registry.entities_by_identity();
    let remote = snapshot.entities_by_identity();

    let comparison = classify(local, remote)?;

    // Dependency edges consider everything known to the pass, declared
    // definitions winning over observed ones.
    let mut known = remote.clone();
    for (identity, entity) in local {
        known.insert(identity.clone(), entity.clone());
    }
    let graph = DependencyGraph::build(&known);

    build_plan(&comparison, local, remote, &graph)
}
