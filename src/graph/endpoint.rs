//! Endpoint storage: get-or-create a typed pointer for each concrete entity.
//!
//! Endpoints are deduplicated so separately created references to the same
//! entity share one row. The partial unique indexes on `partner_id` and
//! `work_item_id` are the backstop for concurrent creation; a losing insert
//! refetches the winner's row exactly once.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{is_unique_violation, CaselinkError, Result};
use crate::graph::{resolver, Endpoint, EndpointKind, EntityRef};

fn endpoint_from_row(
    row: (String, String, Option<String>, Option<String>, String),
) -> Result<Endpoint> {
    let (endpoint_id, kind, partner_id, work_item_id, created_at) = row;
    let kind = EndpointKind::parse(&kind).ok_or_else(|| {
        CaselinkError::InvalidReference(format!(
            "endpoint {} has unknown discriminant '{}'",
            endpoint_id, kind
        ))
    })?;
    let endpoint = Endpoint {
        endpoint_id,
        kind,
        partner_id,
        work_item_id,
        created_at,
    };
    // Surface defect rows (zero or two references, wrong discriminant) on load.
    endpoint.entity_ref()?;
    Ok(endpoint)
}

/// Load an endpoint row by id.
pub(crate) fn endpoint_by_id(conn: &Connection, endpoint_id: &str) -> Result<Endpoint> {
    let row = conn
        .query_row(
            "SELECT endpoint_id, kind, partner_id, work_item_id, created_at \
             FROM endpoints WHERE endpoint_id = ?1",
            params![endpoint_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(CaselinkError::Database)?
        .ok_or_else(|| CaselinkError::NotFound {
            what: "endpoint",
            id: endpoint_id.to_string(),
        })?;
    endpoint_from_row(row)
}

/// Find the existing endpoint for a concrete entity, if any.
pub(crate) fn find_endpoint(conn: &Connection, entity: &EntityRef) -> Result<Option<Endpoint>> {
    let sql = match entity.kind() {
        EndpointKind::Person | EndpointKind::Organization => {
            "SELECT endpoint_id, kind, partner_id, work_item_id, created_at \
             FROM endpoints WHERE partner_id = ?1"
        }
        EndpointKind::WorkItem => {
            "SELECT endpoint_id, kind, partner_id, work_item_id, created_at \
             FROM endpoints WHERE work_item_id = ?1"
        }
    };
    let row = conn
        .query_row(sql, params![entity.id()], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })
        .optional()
        .map_err(CaselinkError::Database)?;

    let Some(row) = row else { return Ok(None) };
    let endpoint = endpoint_from_row(row)?;
    if endpoint.kind != entity.kind() {
        return Err(CaselinkError::InvalidReference(format!(
            "endpoint {} stores discriminant '{}' but entity {} is a {}",
            endpoint.endpoint_id,
            endpoint.kind,
            entity.id(),
            entity.kind()
        )));
    }
    Ok(Some(endpoint))
}

/// Get or create the endpoint wrapping a concrete entity.
///
/// Resolution happens first, so a dangling or mistyped reference fails before
/// anything is written.
pub(crate) fn endpoint_for(conn: &Connection, entity: &EntityRef) -> Result<Endpoint> {
    resolver::resolve(conn, entity)?;

    if let Some(existing) = find_endpoint(conn, entity)? {
        return Ok(existing);
    }

    let endpoint = Endpoint {
        endpoint_id: Uuid::new_v4().to_string(),
        kind: entity.kind(),
        partner_id: match entity.kind() {
            EndpointKind::Person | EndpointKind::Organization => Some(entity.id().to_string()),
            EndpointKind::WorkItem => None,
        },
        work_item_id: match entity.kind() {
            EndpointKind::WorkItem => Some(entity.id().to_string()),
            _ => None,
        },
        created_at: Utc::now().to_rfc3339(),
    };

    let inserted = conn.execute(
        "INSERT INTO endpoints (endpoint_id, kind, partner_id, work_item_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            endpoint.endpoint_id,
            endpoint.kind.as_str(),
            endpoint.partner_id,
            endpoint.work_item_id,
            endpoint.created_at
        ],
    );

    match inserted {
        Ok(_) => Ok(endpoint),
        // Lost a creation race; the unique index guarantees the winner's row
        // exists now, so refetch once.
        Err(e) if is_unique_violation(&e) => {
            find_endpoint(conn, entity)?.ok_or(CaselinkError::Database(e))
        }
        Err(e) => Err(CaselinkError::Database(e)),
    }
}

/// Async convenience wrapper: get or create the endpoint for an entity.
pub async fn endpoint_for_entity(db: &Db, entity: EntityRef) -> Result<Endpoint> {
    db.with_connection(move |conn| endpoint_for(conn, &entity))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use crate::directory::{create_person, create_tenant, create_work_item};
    use std::path::Path;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_endpoint_get_or_create_is_idempotent() {
        let (db, _temp) = setup_test_db().await;
        let tenant = create_tenant(&db, "Acme").await.unwrap();
        let person = create_person(&db, &tenant.tenant_id, "Ada", "Lovelace", "ada@acme.test", None)
            .await
            .unwrap();

        let entity = EntityRef::Person(person.partner_id.clone());
        let first = endpoint_for_entity(&db, entity.clone()).await.unwrap();
        let second = endpoint_for_entity(&db, entity.clone()).await.unwrap();
        assert_eq!(first.endpoint_id, second.endpoint_id);

        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM endpoints", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_endpoint_for_missing_entity_fails() {
        let (db, _temp) = setup_test_db().await;
        let err = endpoint_for_entity(&db, EntityRef::WorkItem("missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CaselinkError::NotFound { .. }));

        // Nothing was written.
        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM endpoints", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_endpoint_storage_rejects_double_reference() {
        let (db, _temp) = setup_test_db().await;
        let tenant = create_tenant(&db, "Acme").await.unwrap();
        let person = create_person(&db, &tenant.tenant_id, "Ada", "Lovelace", "ada@acme.test", None)
            .await
            .unwrap();
        let item = create_work_item(&db, &tenant.tenant_id, "Broken printer")
            .await
            .unwrap();

        // The CHECK constraint refuses a row referencing two entities.
        let pid = person.partner_id.clone();
        let wid = item.work_item_id.clone();
        let result = db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO endpoints (endpoint_id, kind, partner_id, work_item_id, created_at) \
                     VALUES ('e1', 'person', ?1, ?2, '2026-01-01T00:00:00Z')",
                    params![pid, wid],
                )?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_endpoint_race_refetches_existing_row() {
        let (db, _temp) = setup_test_db().await;
        let tenant = create_tenant(&db, "Acme").await.unwrap();
        let item = create_work_item(&db, &tenant.tenant_id, "Broken printer")
            .await
            .unwrap();

        // Simulate the losing side of a get-or-create race: another writer
        // inserted the endpoint between our lookup and our insert.
        let wid = item.work_item_id.clone();
        let endpoint = db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO endpoints (endpoint_id, kind, partner_id, work_item_id, created_at) \
                     VALUES ('winner', 'work_item', NULL, ?1, '2026-01-01T00:00:00Z')",
                    params![wid.clone()],
                )?;
                // Direct insert attempt hits the unique index, then refetches.
                let insert = conn.execute(
                    "INSERT INTO endpoints (endpoint_id, kind, partner_id, work_item_id, created_at) \
                     VALUES ('loser', 'work_item', NULL, ?1, '2026-01-01T00:00:01Z')",
                    params![wid.clone()],
                );
                assert!(insert.is_err());
                endpoint_for(conn, &EntityRef::WorkItem(wid))
            })
            .await
            .unwrap();
        assert_eq!(endpoint.endpoint_id, "winner");
    }
}
