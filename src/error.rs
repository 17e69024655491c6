use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Two entities on the same side of a pass share an identity.
    ///
    /// Identities must be unique within a registry or a catalog snapshot;
    /// a collision is a configuration error, never silently merged.
    #[error("duplicate identity: {first} was registered again as {second}")]
    DuplicateIdentity { first: String, second: String },

    /// A hard dependency cycle among entities that must be ordered together.
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// An entity kind with no policy table row reached classification or
    /// ordering. Indicates a registration-time bug.
    #[error("unsupported entity kind: {kind}")]
    UnsupportedKind { kind: String },
}
