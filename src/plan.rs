//! Plan building - turn a classification plus an ordering into operations.
//!
//! The plan runs in two phases: a teardown phase (drops, in dependents-first
//! order) followed by a build phase (creates and replaces, in
//! dependencies-first order). An entity whose kind cannot represent its
//! change as an in-place replace contributes one operation to each phase,
//! so its drop half always executes before its create half.
//!
//! Every operation carries enough of the prior observed state to be
//! reversed; [`Plan::reversed`] derives the symmetric undo sequence without
//! consulting the database again.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;

use crate::diff::ComparisonResult;
use crate::entity::{Entity, Identity};
use crate::solver::DependencyGraph;
use crate::Result;

/// What an operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Replace,
    Drop,
    /// The change cannot run as a replace; the object is dropped in the
    /// teardown phase and created again in the build phase.
    DropAndRecreate,
}

/// Which phase of the plan an operation executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Teardown,
    Build,
}

/// The definition needed to undo an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseDefinition {
    /// The prior observed definition, captured at plan-build time.
    Restorable(String),
    /// The object did not previously exist; undo is a plain drop.
    NotRestorable,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOperation {
    pub identity: Identity,
    pub action: Action,
    pub phase: Phase,
    /// Definition this operation installs; `None` for pure drops.
    pub forward_definition: Option<String>,
    pub reverse_definition: ReverseDefinition,
}

impl fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.action, self.phase) {
            (Action::Create, _) => write!(f, "+ {}", self.identity),
            (Action::Replace, _) => write!(f, "~ {}", self.identity),
            (Action::Drop, _) => write!(f, "- {}", self.identity),
            (Action::DropAndRecreate, Phase::Teardown) => {
                write!(f, "- {} (recreate)", self.identity)
            }
            (Action::DropAndRecreate, Phase::Build) => {
                write!(f, "+ {} (recreate)", self.identity)
            }
        }
    }
}

/// Ordered sequence of operations transforming observed state into declared
/// state. The terminal output of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    operations: Vec<PlanOperation>,
}

impl Plan {
    pub fn operations(&self) -> &[PlanOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// The symmetric reverse plan: undoes this plan when executed after it.
    pub fn reversed(&self) -> Plan {
        // A drop-and-recreate pair splits the old and new definitions across
        // its two halves; pair them up so both reversed halves know the
        // definition they need.
        let mut pair_new: IndexMap<&Identity, Option<&str>> = IndexMap::new();
        for op in &self.operations {
            if op.action == Action::DropAndRecreate && op.phase == Phase::Build {
                pair_new.insert(&op.identity, op.forward_definition.as_deref());
            }
        }

        let operations = self
            .operations
            .iter()
            .rev()
            .map(|op| match (op.action, op.phase) {
                (Action::Create, _) => PlanOperation {
                    identity: op.identity.clone(),
                    action: Action::Drop,
                    phase: Phase::Teardown,
                    forward_definition: None,
                    reverse_definition: match &op.forward_definition {
                        Some(def) => ReverseDefinition::Restorable(def.clone()),
                        None => ReverseDefinition::NotRestorable,
                    },
                },
                (Action::Drop, _) => PlanOperation {
                    identity: op.identity.clone(),
                    action: Action::Create,
                    phase: Phase::Build,
                    forward_definition: match &op.reverse_definition {
                        ReverseDefinition::Restorable(def) => Some(def.clone()),
                        ReverseDefinition::NotRestorable => None,
                    },
                    reverse_definition: ReverseDefinition::NotRestorable,
                },
                (Action::Replace, _) => PlanOperation {
                    identity: op.identity.clone(),
                    action: Action::Replace,
                    phase: Phase::Build,
                    forward_definition: match &op.reverse_definition {
                        ReverseDefinition::Restorable(def) => Some(def.clone()),
                        ReverseDefinition::NotRestorable => None,
                    },
                    reverse_definition: match &op.forward_definition {
                        Some(def) => ReverseDefinition::Restorable(def.clone()),
                        None => ReverseDefinition::NotRestorable,
                    },
                },
                (Action::DropAndRecreate, Phase::Build) => PlanOperation {
                    identity: op.identity.clone(),
                    action: Action::DropAndRecreate,
                    phase: Phase::Teardown,
                    forward_definition: None,
                    reverse_definition: match &op.forward_definition {
                        Some(def) => ReverseDefinition::Restorable(def.clone()),
                        None => ReverseDefinition::NotRestorable,
                    },
                },
                (Action::DropAndRecreate, Phase::Teardown) => PlanOperation {
                    identity: op.identity.clone(),
                    action: Action::DropAndRecreate,
                    phase: Phase::Build,
                    forward_definition: match &op.reverse_definition {
                        ReverseDefinition::Restorable(def) => Some(def.clone()),
                        ReverseDefinition::NotRestorable => None,
                    },
                    reverse_definition: match pair_new.get(&op.identity).copied().flatten() {
                        Some(def) => ReverseDefinition::Restorable(def.to_string()),
                        None => ReverseDefinition::NotRestorable,
                    },
                },
            })
            .collect();

        Plan { operations }
    }

    /// Render every operation through the host's DDL renderer, drop halves
    /// before create halves. Rendering itself is the host's responsibility.
    pub fn render(&self, renderer: &dyn DdlRenderer) -> Vec<String> {
        let mut statements = Vec::with_capacity(self.operations.len());
        for op in &self.operations {
            match (op.action, op.phase) {
                (Action::Drop, _) | (Action::DropAndRecreate, Phase::Teardown) => {
                    statements.push(renderer.render_drop(&op.identity));
                }
                (Action::Create, _) | (Action::DropAndRecreate, Phase::Build) => {
                    if let Some(def) = &op.forward_definition {
                        statements.push(renderer.render_create(&op.identity, def));
                    }
                }
                (Action::Replace, _) => {
                    if let Some(def) = &op.forward_definition {
                        statements.push(renderer.render_replace(&op.identity, def));
                    }
                }
            }
        }
        statements
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operations.is_empty() {
            writeln!(f, "No changes detected.")?;
        } else {
            for op in &self.operations {
                writeln!(f, "{}", op)?;
            }
        }
        Ok(())
    }
}

/// Host hook that turns plan operations into executable DDL text.
pub trait DdlRenderer {
    fn render_create(&self, identity: &Identity, definition: &str) -> String;
    fn render_drop(&self, identity: &Identity) -> String;
    fn render_replace(&self, identity: &Identity, definition: &str) -> String;
}

/// Combine a classification with dependency ordering into a plan.
///
/// Teardown phase first (drop order over removed entities and the drop
/// halves of non-replaceable changes), then build phase (creation order over
/// new entities, replaces, and create halves).
pub fn build_plan(
    comparison: &IndexMap<Identity, ComparisonResult>,
    local: &IndexMap<Identity, Entity>,
    remote: &IndexMap<Identity, Entity>,
    graph: &DependencyGraph,
) -> Result<Plan> {
    let mut teardown: BTreeSet<Identity> = BTreeSet::new();
    let mut build: BTreeSet<Identity> = BTreeSet::new();
    let mut in_place: BTreeSet<Identity> = BTreeSet::new();

    for (identity, result) in comparison {
        match result {
            ComparisonResult::Unchanged => {}
            ComparisonResult::New => {
                build.insert(identity.clone());
            }
            ComparisonResult::Removed => {
                teardown.insert(identity.clone());
            }
            ComparisonResult::Changed => {
                let policy = identity.kind.policy()?;
                let replaceable = match (local.get(identity), remote.get(identity)) {
                    (Some(declared), Some(observed)) => (policy.supports_in_place_replace)(
                        observed.definition(),
                        declared.definition(),
                    ),
                    // classification guarantees both sides exist
                    _ => false,
                };
                if replaceable {
                    in_place.insert(identity.clone());
                } else {
                    teardown.insert(identity.clone());
                }
                build.insert(identity.clone());
            }
        }
    }

    let mut operations = Vec::with_capacity(teardown.len() + build.len());

    for identity in graph.drop_order(&teardown)? {
        let prior = remote
            .get(&identity)
            .map(|e| ReverseDefinition::Restorable(e.definition().to_string()))
            .unwrap_or(ReverseDefinition::NotRestorable);
        let action = match comparison.get(&identity) {
            Some(ComparisonResult::Changed) => Action::DropAndRecreate,
            _ => Action::Drop,
        };
        tracing::info!(identity = %identity, ?action, "planned teardown operation");
        operations.push(PlanOperation {
            identity,
            action,
            phase: Phase::Teardown,
            forward_definition: None,
            reverse_definition: prior,
        });
    }

    for identity in graph.creation_order(&build)? {
        let forward = local.get(&identity).map(|e| e.definition().to_string());
        let (action, reverse) = match comparison.get(&identity) {
            Some(ComparisonResult::New) => (Action::Create, ReverseDefinition::NotRestorable),
            _ => {
                let prior = remote
                    .get(&identity)
                    .map(|e| ReverseDefinition::Restorable(e.definition().to_string()))
                    .unwrap_or(ReverseDefinition::NotRestorable);
                if in_place.contains(&identity) {
                    (Action::Replace, prior)
                } else {
                    (Action::DropAndRecreate, prior)
                }
            }
        };
        tracing::info!(identity = %identity, ?action, "planned build operation");
        operations.push(PlanOperation {
            identity,
            action,
            phase: Phase::Build,
            forward_definition: forward,
            reverse_definition: reverse,
        });
    }

    Ok(Plan { operations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reconcile, CatalogSnapshot, Registry};

    fn plan_for(local: &[Entity], remote: &[Entity]) -> Plan {
        let registry = Registry::register(local.iter().cloned(), &[]).unwrap();
        let snapshot = CatalogSnapshot::from_entities(remote.iter().cloned()).unwrap();
        reconcile(&registry, &snapshot).unwrap()
    }

    #[test]
    fn test_new_function_becomes_create() {
        let func = Entity::function(
            "public",
            "to_upper(text)",
            "RETURNS text AS $$ select upper($1) $$ LANGUAGE sql",
        );
        let plan = plan_for(&[func.clone()], &[]);

        assert_eq!(plan.len(), 1);
        let op = &plan.operations()[0];
        assert_eq!(op.identity, func.identity());
        assert_eq!(op.action, Action::Create);
        assert_eq!(op.forward_definition.as_deref(), Some(func.definition()));
        assert_eq!(op.reverse_definition, ReverseDefinition::NotRestorable);
    }

    #[test]
    fn test_changed_function_becomes_replace_with_prior_reverse() {
        let b1 = "RETURNS text AS $$ select upper($1) $$ LANGUAGE sql";
        let b2 = "RETURNS text AS $$ select upper(trim($1)) $$ LANGUAGE sql";
        let declared = Entity::function("public", "to_upper(text)", b2);
        let observed = Entity::function("public", "to_upper(text)", b1);

        let plan = plan_for(&[declared.clone()], &[observed]);

        assert_eq!(plan.len(), 1);
        let op = &plan.operations()[0];
        assert_eq!(op.action, Action::Replace);
        assert_eq!(op.forward_definition.as_deref(), Some(b2));
        assert_eq!(
            op.reverse_definition,
            ReverseDefinition::Restorable(b1.to_string())
        );
    }

    #[test]
    fn test_undeclared_function_becomes_drop_with_create_reverse() {
        let legacy = Entity::function(
            "public",
            "legacy_fn()",
            "RETURNS int AS $$ select 1 $$ LANGUAGE sql",
        );
        let plan = plan_for(&[], &[legacy.clone()]);

        assert_eq!(plan.len(), 1);
        let op = &plan.operations()[0];
        assert_eq!(op.identity, legacy.identity());
        assert_eq!(op.action, Action::Drop);
        assert_eq!(op.forward_definition, None);
        assert_eq!(
            op.reverse_definition,
            ReverseDefinition::Restorable(legacy.definition().to_string())
        );
    }

    #[test]
    fn test_changed_return_type_becomes_drop_and_recreate() {
        let declared = Entity::function(
            "public",
            "f()",
            "RETURNS bigint AS $$ select 1 $$ LANGUAGE sql",
        );
        let observed = Entity::function(
            "public",
            "f()",
            "RETURNS integer AS $$ select 1 $$ LANGUAGE sql",
        );
        let plan = plan_for(&[declared.clone()], &[observed.clone()]);

        assert_eq!(plan.len(), 2);
        let drop_half = plan
            .operations()
            .iter()
            .position(|op| op.phase == Phase::Teardown)
            .unwrap();
        let create_half = plan
            .operations()
            .iter()
            .position(|op| op.phase == Phase::Build)
            .unwrap();

        assert!(drop_half < create_half, "drop half must precede create half");
        for op in plan.operations() {
            assert_eq!(op.action, Action::DropAndRecreate);
            assert_eq!(op.identity, declared.identity());
        }
        assert_eq!(
            plan.operations()[create_half].reverse_definition,
            ReverseDefinition::Restorable(observed.definition().to_string())
        );
    }

    #[test]
    fn test_unchanged_emits_no_operation() {
        let view = Entity::view("public", "v", "select 1");
        let plan = plan_for(&[view.clone()], &[view.clone()]);
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No changes detected.\n");
    }

    #[test]
    fn test_reversed_plan_round_trips() {
        let b1 = "RETURNS text AS $$ select upper($1) $$ LANGUAGE sql";
        let b2 = "RETURNS text AS $$ select upper(trim($1)) $$ LANGUAGE sql";
        let plan = plan_for(
            &[
                Entity::function("public", "to_upper(text)", b2),
                Entity::view("public", "fresh", "select 1"),
                Entity::policy("public", "p", "public.account", "FOR SELECT USING (true)"),
            ],
            &[
                Entity::function("public", "to_upper(text)", b1),
                Entity::view("public", "legacy", "select 2"),
                Entity::policy("public", "p", "public.account", "FOR ALL USING (true)"),
            ],
        );

        assert_eq!(plan.reversed().reversed(), plan);
    }

    #[test]
    fn test_reversed_plan_restores_prior_state() {
        let legacy = Entity::view("public", "legacy", "select 2");
        let plan = plan_for(&[Entity::view("public", "fresh", "select 1")], &[legacy.clone()]);

        let reverse = plan.reversed();
        // dropping "fresh" comes before recreating "legacy"
        assert_eq!(reverse.operations()[0].action, Action::Drop);
        assert_eq!(
            reverse.operations()[0].identity,
            Entity::view("public", "fresh", "").identity()
        );
        assert_eq!(reverse.operations()[1].action, Action::Create);
        assert_eq!(
            reverse.operations()[1].forward_definition.as_deref(),
            Some(legacy.definition())
        );
    }

    #[test]
    fn test_render_walks_halves_in_order() {
        struct StubRenderer;
        impl DdlRenderer for StubRenderer {
            fn render_create(&self, identity: &Identity, _definition: &str) -> String {
                format!("CREATE {identity}")
            }
            fn render_drop(&self, identity: &Identity) -> String {
                format!("DROP {identity}")
            }
            fn render_replace(&self, identity: &Identity, _definition: &str) -> String {
                format!("REPLACE {identity}")
            }
        }

        let declared = Entity::policy("public", "p", "public.account", "FOR SELECT USING (true)");
        let observed = Entity::policy("public", "p", "public.account", "FOR ALL USING (true)");
        let plan = plan_for(&[declared], &[observed]);

        let statements = plan.render(&StubRenderer);
        assert_eq!(
            statements,
            vec![
                "DROP policy public.p on public.account".to_string(),
                "CREATE policy public.p on public.account".to_string(),
            ]
        );
    }

    #[test]
    fn test_plan_display_snapshot() {
        let plan = plan_for(
            &[
                Entity::view("public", "v1", "select id from account"),
                Entity::view("public", "v2", "select * from v1"),
                Entity::function(
                    "public",
                    "to_upper(text)",
                    "RETURNS text AS $$ select upper($1) $$ LANGUAGE sql",
                ),
            ],
            &[
                Entity::function(
                    "public",
                    "to_upper(text)",
                    "RETURNS text AS $$ select $1 $$ LANGUAGE sql",
                ),
                Entity::view("public", "legacy", "select 2"),
            ],
        );

        insta::assert_snapshot!(plan.to_string(), @r"
        - view public.legacy
        ~ function public.to_upper(text)
        + view public.v1
        + view public.v2
        ");
    }
}
