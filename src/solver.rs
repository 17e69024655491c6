//! Dependency resolution - orders entities so operations can run safely.
//!
//! An edge `A -> B` means "A depends on B": A must be created after B and
//! dropped before B. Edges come from three sources with different trust
//! levels:
//!
//! - `Declared`: an explicit `with_dependency` on the entity.
//! - `Attached`: the entity's `on_entity` names another known entity.
//! - `Inferred`: the textual scan found a reference in the definition.
//!
//! Inferred edges are heuristic. A cycle made only of inferred edges is
//! treated as scanner noise and broken deterministically with a warning; a
//! cycle through any declared or attached edge is real and fails the pass.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use crate::entity::{extract_dependencies, Entity, Identity};
use crate::{Error, Result};

/// Where a dependency edge came from. Ordered by trust: declared edges are
/// the strongest, inferred the weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeSource {
    Declared,
    Attached,
    Inferred,
}

/// Directed dependency graph over all entities known to one pass.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// `(dependent, dependency) -> strongest source` for that pair.
    edges: BTreeMap<(Identity, Identity), EdgeSource>,
}

impl DependencyGraph {
    /// Build the graph for every known entity (declared and observed).
    pub fn build(known: &IndexMap<Identity, Entity>) -> DependencyGraph {
        let mut edges: BTreeMap<(Identity, Identity), EdgeSource> = BTreeMap::new();
        let mut add = |from: &Identity, to: Identity, source: EdgeSource| {
            if *from == to {
                return;
            }
            let entry = edges.entry((from.clone(), to)).or_insert(source);
            if source < *entry {
                *entry = source;
            }
        };

        for (identity, entity) in known {
            for declared in entity.depends_on() {
                if known.contains_key(declared) {
                    add(identity, declared.clone(), EdgeSource::Declared);
                }
            }

            if let Some(on) = entity.on_entity() {
                for candidate in known.keys() {
                    if candidate.qualified_name() == on {
                        add(identity, candidate.clone(), EdgeSource::Attached);
                    }
                }
            }

            for inferred in extract_dependencies(entity, known) {
                add(identity, inferred, EdgeSource::Inferred);
            }
        }

        let graph = DependencyGraph { edges };
        graph.warn_on_missed_references(known);
        graph
    }

    /// Best-effort double-check: an identity name that occurs in an entity's
    /// raw definition but produced no edge is a possible missed dependency,
    /// which can under-order the plan.
    fn warn_on_missed_references(&self, known: &IndexMap<Identity, Entity>) {
        for (identity, entity) in known {
            for other in known.keys() {
                if other == identity
                    || self.edges.contains_key(&(identity.clone(), other.clone()))
                {
                    continue;
                }
                if entity.definition().contains(&other.qualified_name()) {
                    tracing::warn!(
                        entity = %identity,
                        references = %other,
                        "definition mentions an identity that produced no dependency edge; \
                         plan ordering may be incomplete"
                    );
                }
            }
        }
    }

    /// All edges, for inspection.
    pub fn edges(&self) -> impl Iterator<Item = (&Identity, &Identity, EdgeSource)> {
        self.edges.iter().map(|((from, to), src)| (from, to, *src))
    }

    /// Order `set` so every dependency precedes its dependents.
    ///
    /// Topological order; ties broken by identity order
    /// `(kind, schema, signature, on_entity)` so output is reproducible.
    pub fn creation_order(&self, set: &BTreeSet<Identity>) -> Result<Vec<Identity>> {
        // Only edges internal to the set constrain it: dependencies outside
        // the set already exist (or are already gone, for drops).
        let mut edges: BTreeMap<(Identity, Identity), EdgeSource> = self
            .edges
            .iter()
            .filter(|((from, to), _)| set.contains(from) && set.contains(to))
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        loop {
            let remaining = match kahn(set, &edges) {
                Ok(order) => return Ok(order),
                Err(remaining) => remaining,
            };

            let cycle = find_cycle(&remaining, &edges);
            let cycle_edges: Vec<(Identity, Identity)> = cycle
                .windows(2)
                .map(|w| (w[0].clone(), w[1].clone()))
                .collect();

            let hard = cycle_edges
                .iter()
                .any(|pair| edges.get(pair) != Some(&EdgeSource::Inferred));
            if hard {
                let mut members: Vec<String> = cycle.iter().map(|id| id.to_string()).collect();
                members.dedup();
                return Err(Error::DependencyCycle { cycle: members });
            }

            // Inferred-only cycle: scanner noise. Drop the greatest edge so
            // the break point is reproducible, and keep going.
            if let Some(victim) = cycle_edges.iter().max().cloned() {
                tracing::warn!(
                    from = %victim.0,
                    to = %victim.1,
                    "breaking inferred dependency cycle at weakest point"
                );
                edges.remove(&victim);
            }
        }
    }

    /// Order `set` so every dependent precedes its dependencies: the reverse
    /// of the creation order restricted to the set being dropped.
    pub fn drop_order(&self, set: &BTreeSet<Identity>) -> Result<Vec<Identity>> {
        let mut order = self.creation_order(set)?;
        order.reverse();
        Ok(order)
    }
}

/// Kahn's algorithm with a sorted ready set. On a cycle, returns the nodes
/// that could not be ordered.
fn kahn(
    nodes: &BTreeSet<Identity>,
    edges: &BTreeMap<(Identity, Identity), EdgeSource>,
) -> std::result::Result<Vec<Identity>, BTreeSet<Identity>> {
    let mut outstanding: BTreeMap<Identity, BTreeSet<Identity>> =
        nodes.iter().map(|n| (n.clone(), BTreeSet::new())).collect();
    let mut dependents: BTreeMap<Identity, Vec<Identity>> = BTreeMap::new();
    for (from, to) in edges.keys() {
        if let Some(deps) = outstanding.get_mut(from) {
            deps.insert(to.clone());
        }
        dependents.entry(to.clone()).or_default().push(from.clone());
    }

    let mut ready: BTreeSet<Identity> = outstanding
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(n, _)| n.clone())
        .collect();
    for node in &ready {
        outstanding.remove(node);
    }

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.iter().next().cloned() {
        ready.remove(&next);
        for dependent in dependents.get(&next).into_iter().flatten() {
            if let Some(deps) = outstanding.get_mut(dependent) {
                deps.remove(&next);
                if deps.is_empty() {
                    outstanding.remove(dependent);
                    ready.insert(dependent.clone());
                }
            }
        }
        order.push(next);
    }

    if outstanding.is_empty() {
        Ok(order)
    } else {
        Err(outstanding.into_keys().collect())
    }
}

/// Walk dependency edges from the smallest stuck node until a node repeats.
/// Returns the closed cycle path (first member repeated at the end).
fn find_cycle(
    remaining: &BTreeSet<Identity>,
    edges: &BTreeMap<(Identity, Identity), EdgeSource>,
) -> Vec<Identity> {
    let mut path: Vec<Identity> = Vec::new();
    let mut current = match remaining.iter().next() {
        Some(node) => node.clone(),
        None => return path,
    };

    loop {
        if let Some(at) = path.iter().position(|n| *n == current) {
            let mut cycle = path.split_off(at);
            cycle.push(current);
            return cycle;
        }
        path.push(current.clone());

        // Smallest outgoing edge that stays among the stuck nodes. Every
        // stuck node has at least one, or Kahn's would have ordered it.
        let next = edges
            .keys()
            .filter(|(from, _)| *from == current)
            .map(|(_, to)| to)
            .find(|to| remaining.contains(*to));
        match next {
            Some(to) => current = to.clone(),
            None => return path,
        }
    }
}
