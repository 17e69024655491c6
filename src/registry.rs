//! Registry - the locally declared side of a reconciliation pass.
//!
//! A [`Registry`] is an explicit value built once per pass and handed to the
//! engine; there is no process-wide accumulator of registered entities.

use indexmap::IndexMap;

use crate::entity::{Entity, Identity};
use crate::{Error, Result};

/// The declared entities for one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: IndexMap<Identity, Entity>,
    excluded_schemas: Vec<String>,
}

impl Registry {
    /// Build a registry from declared entities.
    ///
    /// Entities whose schema appears in `exclude_schemas` are dropped before
    /// duplicate detection. Two remaining entities sharing an identity fail
    /// with [`Error::DuplicateIdentity`].
    pub fn register(
        entities: impl IntoIterator<Item = Entity>,
        exclude_schemas: &[&str],
    ) -> Result<Registry> {
        let kept = entities
            .into_iter()
            .filter(|e| !exclude_schemas.contains(&e.schema()));

        Ok(Registry {
            entities: index_by_identity(kept)?,
            excluded_schemas: exclude_schemas.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// The declared entities keyed by identity, in registration order.
    ///
    /// No iteration order is guaranteed to callers beyond what they sort
    /// themselves; plan order comes from the dependency resolver alone.
    pub fn entities_by_identity(&self) -> &IndexMap<Identity, Entity> {
        &self.entities
    }

    /// Whether an observed object falls under this registry's management:
    /// its schema is not excluded. Used by the host comparator hook.
    pub fn owns(&self, identity: &Identity) -> bool {
        !self.excluded_schemas.iter().any(|s| s == &identity.schema)
    }

    pub fn get(&self, identity: &Identity) -> Option<&Entity> {
        self.entities.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Index entities by identity, failing on the first collision.
pub(crate) fn index_by_identity(
    entities: impl IntoIterator<Item = Entity>,
) -> Result<IndexMap<Identity, Entity>> {
    let mut map = IndexMap::new();
    for entity in entities {
        let identity = entity.identity();
        if let Some(first) = map.insert(identity.clone(), entity) {
            return Err(Error::DuplicateIdentity {
                first: first.identity().to_string(),
                second: identity.to_string(),
            });
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_register_keeps_declaration_order() {
        let registry = Registry::register(
            [
                Entity::view("public", "v2", "select * from v1"),
                Entity::view("public", "v1", "select 1"),
            ],
            &[],
        )
        .unwrap();

        let names: Vec<_> = registry
            .entities_by_identity()
            .keys()
            .map(|id| id.signature.clone())
            .collect();
        assert_eq!(names, ["v2", "v1"]);
    }

    #[test]
    fn test_duplicate_identity_is_fatal() {
        let err = Registry::register(
            [
                Entity::function("public", "to_upper(text)", "RETURNS text AS $$ a $$"),
                Entity::function("public", "to_upper(text)", "RETURNS text AS $$ b $$"),
            ],
            &[],
        )
        .unwrap_err();

        match err {
            Error::DuplicateIdentity { first, second } => {
                assert_eq!(first, "function public.to_upper(text)");
                assert_eq!(second, "function public.to_upper(text)");
            }
            other => panic!("expected DuplicateIdentity, got {other:?}"),
        }
    }

    #[test]
    fn test_same_signature_different_on_entity_is_not_a_duplicate() {
        let registry = Registry::register(
            [
                Entity::policy("public", "allow_all", "public.account", "FOR ALL USING (true)"),
                Entity::policy("public", "allow_all", "public.invoice", "FOR ALL USING (true)"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_exclude_schemas_applies_before_duplicate_check() {
        // the two "scratch" declarations collide, but the schema is excluded
        let registry = Registry::register(
            [
                Entity::view("scratch", "v", "select 1"),
                Entity::view("scratch", "v", "select 2"),
                Entity::view("public", "v", "select 3"),
            ],
            &["scratch"],
        )
        .unwrap();

        assert_eq!(registry.len(), 1);
        let only = registry.entities_by_identity().keys().next().unwrap();
        assert_eq!(only.schema, "public");
    }

    #[test]
    fn test_owns_respects_excluded_schemas() {
        let registry =
            Registry::register([Entity::view("public", "v", "select 1")], &["scratch"]).unwrap();

        let owned = Entity::view("public", "other", "select 2").identity();
        let excluded = Entity::view("scratch", "tmp", "select 3").identity();
        assert!(registry.owns(&owned));
        assert!(!registry.owns(&excluded));
    }
}
