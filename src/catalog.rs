//! Catalog snapshot - the observed side of a reconciliation pass.
//!
//! The engine never talks to a database. A [`CatalogReader`] implementation
//! (SQL queries against catalog views, a fixture, whatever) materializes the
//! observed objects, and a [`CatalogSnapshot`] freezes them for one pass.
//! Definitions arrive raw, exactly as the reader returned them; they are
//! normalized at compare time only.

use indexmap::IndexMap;

use crate::entity::{Entity, Identity};
use crate::registry::index_by_identity;
use crate::Result;

/// Capability that reads the current catalog state of a target database.
///
/// Implementations must keep identities stable across reads and must not
/// normalize definition text themselves.
pub trait CatalogReader {
    /// Read every managed object in the given schemas.
    fn read_catalog(&mut self, schemas: &[&str]) -> Result<Vec<Entity>>;
}

/// The observed entities for one reconciliation pass. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    entities: IndexMap<Identity, Entity>,
}

impl CatalogSnapshot {
    /// Freeze a set of observed entities.
    ///
    /// Duplicate observed identities are as fatal as duplicate declared
    /// ones; a catalog cannot legitimately contain two objects with the
    /// same identity.
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Result<CatalogSnapshot> {
        Ok(CatalogSnapshot {
            entities: index_by_identity(entities)?,
        })
    }

    /// Read a snapshot through a [`CatalogReader`].
    pub fn load(reader: &mut dyn CatalogReader, schemas: &[&str]) -> Result<CatalogSnapshot> {
        CatalogSnapshot::from_entities(reader.read_catalog(schemas)?)
    }

    /// The observed entities keyed by identity.
    pub fn entities_by_identity(&self) -> &IndexMap<Identity, Entity> {
        &self.entities
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
