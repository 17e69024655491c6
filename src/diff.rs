//! Diff classification - compare declared entities against observed ones.
//!
//! For the union of identities on both sides, each entity lands in exactly
//! one of four states. Classification looks at one entity's own normalized
//! definition only; dependency edges influence ordering later, never the
//! classification itself.

use indexmap::IndexMap;

use crate::entity::{Entity, Identity};
use crate::registry::Registry;
use crate::Result;

/// The state of one identity after comparing declared and observed sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonResult {
    /// Present on both sides with equal normalized definitions.
    Unchanged,
    /// Declared but not observed.
    New,
    /// Present on both sides with differing normalized definitions.
    Changed,
    /// Observed but not declared.
    Removed,
}

/// Classify every identity present on either side.
///
/// Pure: same inputs, same outputs, no I/O. Output order is declared
/// entities in registration order followed by observed-only identities in
/// snapshot order.
pub fn classify(
    local: &IndexMap<Identity, Entity>,
    remote: &IndexMap<Identity, Entity>,
) -> Result<IndexMap<Identity, ComparisonResult>> {
    let mut results = IndexMap::new();

    for (identity, declared) in local {
        let result = match remote.get(identity) {
            None => ComparisonResult::New,
            Some(observed) => {
                let normalize = identity.kind.policy()?.normalize;
                if normalize(declared.definition()) == normalize(observed.definition()) {
                    ComparisonResult::Unchanged
                } else {
                    ComparisonResult::Changed
                }
            }
        };
        tracing::debug!(identity = %identity, ?result, "classified declared entity");
        results.insert(identity.clone(), result);
    }

    for identity in remote.keys() {
        if !local.contains_key(identity) {
            tracing::debug!(identity = %identity, "classified observed-only entity as removed");
            results.insert(identity.clone(), ComparisonResult::Removed);
        }
    }

    Ok(results)
}

/// Host comparator hook: called per observed object during the host's own
/// diff pass.
///
/// Returns `None` when the object is not owned by this engine (its schema is
/// excluded from management), otherwise its classification against the
/// registry.
pub fn compare_observed(
    registry: &Registry,
    observed: &Entity,
) -> Result<Option<ComparisonResult>> {
    let identity = observed.identity();
    if !registry.owns(&identity) {
        return Ok(None);
    }

    let result = match registry.get(&identity) {
        None => ComparisonResult::Removed,
        Some(declared) => {
            let normalize = identity.kind.policy()?.normalize;
            if normalize(declared.definition()) == normalize(observed.definition()) {
                ComparisonResult::Unchanged
            } else {
                ComparisonResult::Changed
            }
        }
    };
    Ok(Some(result))
}
