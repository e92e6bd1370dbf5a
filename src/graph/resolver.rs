//! Polymorphic entity resolution: from a typed reference (or a stored
//! endpoint) to the concrete directory row, with a uniform tenant and
//! display-name view used by validation everywhere else in the graph.

use rusqlite::Connection;

use crate::db::Db;
use crate::directory::{self, Partner, WorkItem};
use crate::error::{CaselinkError, Result};
use crate::graph::{Endpoint, EndpointKind, EntityRef};

/// A resolved concrete entity.
#[derive(Debug, Clone)]
pub enum ResolvedEntity {
    Partner(Partner),
    WorkItem(WorkItem),
}

impl ResolvedEntity {
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::Partner(p) => &p.tenant_id,
            Self::WorkItem(w) => &w.tenant_id,
        }
    }

    /// "First Last" for persons, organization name, work item title.
    pub fn display_name(&self) -> String {
        match self {
            Self::Partner(p) => p.display_name(),
            Self::WorkItem(w) => w.title.clone(),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Partner(p) if p.is_person() => EndpointKind::Person,
            Self::Partner(_) => EndpointKind::Organization,
            Self::WorkItem(_) => EndpointKind::WorkItem,
        }
    }
}

/// Resolve a typed reference to its concrete row.
///
/// `NotFound` if the row is missing; `TypeMismatch` if the reference asserts
/// a partner discriminant that does not match the stored partner kind.
pub(crate) fn resolve(conn: &Connection, entity: &EntityRef) -> Result<ResolvedEntity> {
    match entity {
        EntityRef::Person(id) | EntityRef::Organization(id) => {
            let partner =
                directory::partner_by_id(conn, id)?.ok_or_else(|| CaselinkError::NotFound {
                    what: "partner",
                    id: id.clone(),
                })?;
            let actual = if partner.is_person() {
                EndpointKind::Person
            } else {
                EndpointKind::Organization
            };
            if actual != entity.kind() {
                return Err(CaselinkError::TypeMismatch {
                    expected: entity.kind().to_string(),
                    actual: actual.to_string(),
                });
            }
            Ok(ResolvedEntity::Partner(partner))
        }
        EntityRef::WorkItem(id) => {
            let item =
                directory::work_item_by_id(conn, id)?.ok_or_else(|| CaselinkError::NotFound {
                    what: "work item",
                    id: id.clone(),
                })?;
            Ok(ResolvedEntity::WorkItem(item))
        }
    }
}

/// Resolve through a stored endpoint row, re-validating the stored
/// discriminant against the resolved type.
pub(crate) fn resolve_endpoint(conn: &Connection, endpoint: &Endpoint) -> Result<ResolvedEntity> {
    let entity = endpoint.entity_ref()?;
    resolve(conn, &entity)
}

/// Async convenience wrapper for callers outside a graph transaction.
pub async fn resolve_entity(db: &Db, entity: EntityRef) -> Result<ResolvedEntity> {
    db.with_connection(move |conn| resolve(conn, &entity)).await
}
