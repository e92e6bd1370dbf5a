use thiserror::Error;

/// Main error type for Caselink
#[derive(Error, Debug)]
pub enum CaselinkError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A referenced row does not exist
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// A reference asserted one discriminant but resolved to another
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Endpoint row violates the single-reference or discriminant invariant
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Edge source and target are the same entity
    #[error("An entity cannot be related to itself")]
    SelfRelation,

    /// Two linked entities disagree on tenant
    #[error("Tenant mismatch: {0}")]
    TenantMismatch(String),

    /// Edge with the same (tenant, source, target, role_label) already exists
    #[error("Duplicate edge: relation '{role_label}' already exists between these entities")]
    DuplicateEdge { role_label: String },

    /// Role assignment row has zero or two role references set
    #[error("Role assignment must carry exactly one of system role or custom role")]
    AmbiguousRole,

    /// The target already holds this role
    #[error("Duplicate role: {0}")]
    DuplicateRole(String),

    /// Batch of user ids that are missing, cross-tenant, or lack a person record
    #[error("Unresolvable users: {}", .0.join(", "))]
    UnresolvableUsers(Vec<String>),
}

/// Convenient Result type using CaselinkError
pub type Result<T> = std::result::Result<T, CaselinkError>;

/// True when a rusqlite error is a UNIQUE (or primary key) constraint failure.
///
/// Used to turn the storage-level uniqueness backstop into domain errors and
/// to resolve get-or-create races by refetching.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
