//! Entity model - identity, normalized definitions, dependency extraction.
//!
//! An [`Entity`] is one declared or observed schema object: a function, view,
//! trigger, and so on. Entities are immutable value objects constructed fresh
//! for each reconciliation pass. Two entities are "the same object" when
//! their [`Identity`] matches; whether they are "the same text" is decided
//! separately from the normalized definition.
//!
//! Per-kind behavior lives in a policy table ([`KindPolicy`]): how to
//! canonicalize a definition and whether a change can run as an in-place
//! replace. Adding a kind means adding one enum variant and one table row;
//! the diff, ordering, and plan-building code never changes.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;

use crate::statement::{coerce_to_unquoted, normalize, normalize_whitespace, strip_terminating_semicolon};
use crate::{Error, Result};

/// The kinds of schema object the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Extension,
    CompositeType,
    Function,
    Procedure,
    View,
    MaterializedView,
    Trigger,
    Policy,
    GrantTable,
}

impl EntityKind {
    /// Lowercase noun used in identity display and plan output.
    pub fn noun(&self) -> &'static str {
        match self {
            EntityKind::Extension => "extension",
            EntityKind::CompositeType => "composite type",
            EntityKind::Function => "function",
            EntityKind::Procedure => "procedure",
            EntityKind::View => "view",
            EntityKind::MaterializedView => "materialized view",
            EntityKind::Trigger => "trigger",
            EntityKind::Policy => "policy",
            EntityKind::GrantTable => "grant",
        }
    }

    /// Whether objects of this kind live in a schema, per the policy table.
    pub fn schema_qualified(&self) -> bool {
        self.policy().map(|p| p.schema_qualified).unwrap_or(true)
    }

    /// Look up this kind's policy table row.
    pub fn policy(&self) -> Result<&'static KindPolicy> {
        POLICIES
            .iter()
            .find(|p| p.kind == *self)
            .ok_or_else(|| Error::UnsupportedKind {
                kind: self.noun().to_string(),
            })
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// Per-kind behavior: one row per [`EntityKind`].
pub struct KindPolicy {
    pub kind: EntityKind,
    /// Canonicalize a definition for equality comparison.
    pub normalize: fn(&str) -> String,
    /// Whether a definition change can run as an in-place replace, or must
    /// drop and recreate the object.
    pub supports_in_place_replace: fn(old: &str, new: &str) -> bool,
    /// Whether objects of this kind live in a schema. Extensions do not.
    pub schema_qualified: bool,
}

fn replace_always(_old: &str, _new: &str) -> bool {
    true
}

fn replace_never(_old: &str, _new: &str) -> bool {
    false
}

/// Functions and procedures only support `CREATE OR REPLACE` when the
/// RETURNS clause is unchanged; a changed return type must drop first.
fn replace_if_same_returns(old: &str, new: &str) -> bool {
    returns_clause(&normalize(old)) == returns_clause(&normalize(new))
}

/// Extract the tokens of a normalized definition's RETURNS clause, up to the
/// body introducer. Definitions without one yield an empty clause.
fn returns_clause(normalized: &str) -> Vec<&str> {
    normalized
        .split_whitespace()
        .skip_while(|t| *t != "returns")
        .skip(1)
        .take_while(|t| *t != "as" && *t != "language" && !t.starts_with('$'))
        .collect()
}

static POLICIES: &[KindPolicy] = &[
    KindPolicy {
        kind: EntityKind::Extension,
        normalize,
        supports_in_place_replace: replace_never,
        schema_qualified: false,
    },
    KindPolicy {
        // no CREATE OR REPLACE TYPE; attribute changes drop and recreate
        kind: EntityKind::CompositeType,
        normalize,
        supports_in_place_replace: replace_never,
        schema_qualified: true,
    },
    KindPolicy {
        kind: EntityKind::Function,
        normalize,
        supports_in_place_replace: replace_if_same_returns,
        schema_qualified: true,
    },
    KindPolicy {
        kind: EntityKind::Procedure,
        normalize,
        supports_in_place_replace: replace_if_same_returns,
        schema_qualified: true,
    },
    KindPolicy {
        kind: EntityKind::View,
        normalize,
        supports_in_place_replace: replace_always,
        schema_qualified: true,
    },
    KindPolicy {
        kind: EntityKind::MaterializedView,
        normalize,
        supports_in_place_replace: replace_never,
        schema_qualified: true,
    },
    KindPolicy {
        kind: EntityKind::Trigger,
        normalize,
        supports_in_place_replace: replace_never,
        schema_qualified: true,
    },
    KindPolicy {
        kind: EntityKind::Policy,
        normalize,
        supports_in_place_replace: replace_never,
        schema_qualified: true,
    },
    KindPolicy {
        kind: EntityKind::GrantTable,
        normalize,
        supports_in_place_replace: replace_always,
        schema_qualified: true,
    },
];

/// The stable key distinguishing entities, independent of definition text.
///
/// Field order matters: `Ord` derives the deterministic
/// `(kind, schema, signature, on_entity)` ordering used for tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub kind: EntityKind,
    pub schema: String,
    pub signature: String,
    pub on_entity: Option<String>,
}

impl Identity {
    pub fn new(
        kind: EntityKind,
        schema: &str,
        signature: &str,
        on_entity: Option<&str>,
    ) -> Identity {
        Identity {
            kind,
            schema: if kind.schema_qualified() {
                coerce_to_unquoted(&normalize_whitespace(schema))
            } else {
                String::new()
            },
            signature: coerce_to_unquoted(&normalize_whitespace(signature)),
            on_entity: on_entity.map(|o| coerce_to_unquoted(&normalize_whitespace(o))),
        }
    }

    /// Object name: the signature with any argument list removed.
    pub fn name(&self) -> &str {
        match self.signature.split_once('(') {
            Some((name, _)) => name.trim_end(),
            None => &self.signature,
        }
    }

    /// `schema.name`, or the bare name for schema-less kinds.
    pub fn qualified_name(&self) -> String {
        if self.schema.is_empty() {
            self.name().to_string()
        } else {
            format!("{}.{}", self.schema, self.name())
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.schema.is_empty() {
            write!(f, "{} {}", self.kind, self.signature)?;
        } else {
            write!(f, "{} {}.{}", self.kind, self.schema, self.signature)?;
        }
        if let Some(on) = &self.on_entity {
            write!(f, " on {}", on)?;
        }
        Ok(())
    }
}

/// A declared or observed schema object.
///
/// Never mutated after construction. The builder methods consume and return
/// the value so declarations read as one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    kind: EntityKind,
    schema: String,
    signature: String,
    on_entity: Option<String>,
    definition: String,
    depends_on: Vec<Identity>,
}

impl Entity {
    pub fn new(kind: EntityKind, schema: &str, signature: &str, definition: &str) -> Entity {
        Entity {
            kind,
            schema: if kind.schema_qualified() {
                coerce_to_unquoted(&normalize_whitespace(schema))
            } else {
                String::new()
            },
            signature: coerce_to_unquoted(&normalize_whitespace(signature)),
            on_entity: None,
            definition: strip_terminating_semicolon(definition).to_string(),
            depends_on: Vec::new(),
        }
    }

    /// A function: signature is `name(argtype, ...)`, definition is the
    /// `RETURNS ... AS ... LANGUAGE ...` remainder.
    pub fn function(schema: &str, signature: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::Function, schema, signature, definition)
    }

    pub fn procedure(schema: &str, signature: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::Procedure, schema, signature, definition)
    }

    /// A view: definition is the SELECT body.
    pub fn view(schema: &str, signature: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::View, schema, signature, definition)
    }

    pub fn materialized_view(schema: &str, signature: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::MaterializedView, schema, signature, definition)
    }

    /// A trigger on `on_entity`, which is part of its identity.
    pub fn trigger(schema: &str, signature: &str, on_entity: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::Trigger, schema, signature, definition).on(on_entity)
    }

    /// A row security policy on `on_entity`, which is part of its identity.
    pub fn policy(schema: &str, signature: &str, on_entity: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::Policy, schema, signature, definition).on(on_entity)
    }

    /// An extension; schema-less, the definition is the version clause.
    pub fn extension(signature: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::Extension, "", signature, definition)
    }

    /// A composite type: definition is the `(attribute type, ...)` list.
    pub fn composite_type(schema: &str, signature: &str, definition: &str) -> Entity {
        Entity::new(EntityKind::CompositeType, schema, signature, definition)
    }

    /// Attach this entity to a relation. Part of identity for kinds that
    /// attach (triggers, policies, grants).
    pub fn on(mut self, on_entity: &str) -> Entity {
        self.on_entity = Some(coerce_to_unquoted(&normalize_whitespace(on_entity)));
        self
    }

    /// Declare an explicit dependency the textual scan cannot be trusted to
    /// find. Declared edges are hard edges: a cycle through one is an error.
    pub fn with_dependency(mut self, dep: Identity) -> Entity {
        self.depends_on.push(dep);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn on_entity(&self) -> Option<&str> {
        self.on_entity.as_deref()
    }

    /// The raw definition text, as declared or as read from the catalog.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn depends_on(&self) -> &[Identity] {
        &self.depends_on
    }

    pub fn identity(&self) -> Identity {
        Identity {
            kind: self.kind,
            schema: self.schema.clone(),
            signature: self.signature.clone(),
            on_entity: self.on_entity.clone(),
        }
    }
}

/// Scan `entity`'s definition for textual references to other known
/// identities.
///
/// Best effort: a known identity counts as referenced when its bare or
/// schema-qualified object name appears at a word boundary in the normalized
/// definition. False negatives are tolerated (surfaced as an ordering risk);
/// false positives only add ordering edges. Never yields a self-edge.
pub fn extract_dependencies(
    entity: &Entity,
    known: &IndexMap<Identity, Entity>,
) -> BTreeSet<Identity> {
    let own = entity.identity();
    let haystack = normalize(entity.definition());

    let mut deps = BTreeSet::new();
    for candidate in known.keys() {
        if *candidate == own {
            continue;
        }
        let qualified = candidate.qualified_name();
        if contains_word(&haystack, &qualified) || contains_word(&haystack, candidate.name()) {
            deps.insert(candidate.clone());
        }
    }
    deps
}

/// Whether `needle` occurs in `haystack` delimited by non-identifier
/// characters on both sides.
pub(crate) fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let at = start + pos;
        let end = at + needle.len();
        let boundary_before = haystack[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_' && c != '.');
        let boundary_after = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_');
        if boundary_before && boundary_after {
            return true;
        }
        // advance by the full first character so the next slice stays on a
        // char boundary
        start = at + haystack[at..].chars().next().map_or(1, |c| c.len_utf8());
    }
    false
}
