//! Directed, role-labeled edges between endpoints.
//!
//! `connect` checks, in order: source differs from target, tenant consistency
//! across both entities and the edge itself, then uniqueness of
//! (tenant, source, target, role_label). The uniqueness check is the storage
//! constraint itself; a violation surfaces as `DuplicateEdge` and idempotent
//! callers may treat it as "already connected".

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, ToSql};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{is_unique_violation, CaselinkError, Result};
use crate::graph::{endpoint, resolver, Edge, EndpointKind, EntityRef, RoleLabel};

fn edge_from_row(row: (String, String, String, String, String, String)) -> Result<Edge> {
    let (edge_id, tenant_id, source_endpoint_id, target_endpoint_id, label, created_at) = row;
    let role_label = RoleLabel::parse(&label).ok_or_else(|| {
        CaselinkError::InvalidReference(format!(
            "edge {} carries unknown role label '{}'",
            edge_id, label
        ))
    })?;
    Ok(Edge {
        edge_id,
        tenant_id,
        source_endpoint_id,
        target_endpoint_id,
        role_label,
        created_at,
    })
}

fn query_edges(conn: &Connection, sql: &str, params: Vec<Box<dyn ToSql>>) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })?;
    let mut edges = Vec::new();
    for row in rows {
        edges.push(edge_from_row(row?)?);
    }
    Ok(edges)
}

const EDGE_COLUMNS: &str =
    "e.edge_id, e.tenant_id, e.source_endpoint_id, e.target_endpoint_id, e.role_label, e.created_at";

/// Connect two entities under a role label, read from the source's
/// perspective: "source is role-label of target".
pub async fn connect(
    db: &Db,
    tenant_id: &str,
    source: &EntityRef,
    target: &EntityRef,
    label: RoleLabel,
) -> Result<Edge> {
    let tenant = tenant_id.to_string();
    let source = source.clone();
    let target = target.clone();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let edge = connect_in(&tx, &tenant, &source, &target, label)?;
        tx.commit()?;
        Ok(edge)
    })
    .await
}

/// Transactional body of `connect`; also used by the assignment facade so
/// reconciliation stays a single transaction.
pub(crate) fn connect_in(
    conn: &Connection,
    tenant_id: &str,
    source: &EntityRef,
    target: &EntityRef,
    label: RoleLabel,
) -> Result<Edge> {
    if source == target {
        return Err(CaselinkError::SelfRelation);
    }

    let resolved_source = resolver::resolve(conn, source)?;
    check_tenant(tenant_id, &resolved_source)?;
    let resolved_target = resolver::resolve(conn, target)?;
    check_tenant(tenant_id, &resolved_target)?;

    let source_ep = endpoint::endpoint_for(conn, source)?;
    let target_ep = endpoint::endpoint_for(conn, target)?;

    let edge = Edge {
        edge_id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        source_endpoint_id: source_ep.endpoint_id,
        target_endpoint_id: target_ep.endpoint_id,
        role_label: label,
        created_at: Utc::now().to_rfc3339(),
    };

    let inserted = conn.execute(
        "INSERT INTO edges (edge_id, tenant_id, source_endpoint_id, target_endpoint_id, role_label, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            edge.edge_id,
            edge.tenant_id,
            edge.source_endpoint_id,
            edge.target_endpoint_id,
            edge.role_label.as_str(),
            edge.created_at
        ],
    );

    match inserted {
        Ok(_) => {
            log::debug!(
                "Connected {} --{}--> {} in tenant {}",
                source.id(),
                label,
                target.id(),
                tenant_id
            );
            Ok(edge)
        }
        Err(e) if is_unique_violation(&e) => Err(CaselinkError::DuplicateEdge {
            role_label: label.as_str().to_string(),
        }),
        Err(e) => Err(CaselinkError::Database(e)),
    }
}

fn check_tenant(tenant_id: &str, resolved: &resolver::ResolvedEntity) -> Result<()> {
    if resolved.tenant_id() != tenant_id {
        return Err(CaselinkError::TenantMismatch(format!(
            "'{}' belongs to tenant {}, edge belongs to tenant {}",
            resolved.display_name(),
            resolved.tenant_id(),
            tenant_id
        )));
    }
    Ok(())
}

/// Delete an edge. Assignment metadata rows cascade with it.
pub async fn disconnect(db: &Db, edge_id: &str) -> Result<()> {
    let id = edge_id.to_string();
    db.with_connection(move |conn| {
        let deleted = conn.execute("DELETE FROM edges WHERE edge_id = ?1", params![id])?;
        if deleted == 0 {
            return Err(CaselinkError::NotFound {
                what: "edge",
                id: id.clone(),
            });
        }
        Ok(())
    })
    .await
}

/// All edges where the entity is the source, optionally filtered by the
/// target's concrete kind.
pub async fn edges_from(
    db: &Db,
    tenant_id: &str,
    entity: &EntityRef,
    target_kind: Option<EndpointKind>,
) -> Result<Vec<Edge>> {
    let tenant = tenant_id.to_string();
    let entity = entity.clone();
    db.with_connection(move |conn| {
        let Some(ep) = endpoint::find_endpoint(conn, &entity)? else {
            return Ok(Vec::new());
        };
        let mut sql = format!(
            "SELECT {EDGE_COLUMNS} FROM edges e \
             JOIN endpoints t ON t.endpoint_id = e.target_endpoint_id \
             WHERE e.tenant_id = ?1 AND e.source_endpoint_id = ?2"
        );
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(tenant), Box::new(ep.endpoint_id)];
        if let Some(kind) = target_kind {
            sql.push_str(" AND t.kind = ?3");
            params.push(Box::new(kind.as_str()));
        }
        sql.push_str(" ORDER BY e.created_at");
        query_edges(conn, &sql, params)
    })
    .await
}

/// All edges where the entity is the target, optionally filtered by the
/// source's concrete kind.
pub async fn edges_to(
    db: &Db,
    tenant_id: &str,
    entity: &EntityRef,
    source_kind: Option<EndpointKind>,
) -> Result<Vec<Edge>> {
    let tenant = tenant_id.to_string();
    let entity = entity.clone();
    db.with_connection(move |conn| {
        let Some(ep) = endpoint::find_endpoint(conn, &entity)? else {
            return Ok(Vec::new());
        };
        let mut sql = format!(
            "SELECT {EDGE_COLUMNS} FROM edges e \
             JOIN endpoints s ON s.endpoint_id = e.source_endpoint_id \
             WHERE e.tenant_id = ?1 AND e.target_endpoint_id = ?2"
        );
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(tenant), Box::new(ep.endpoint_id)];
        if let Some(kind) = source_kind {
            sql.push_str(" AND s.kind = ?3");
            params.push(Box::new(kind.as_str()));
        }
        sql.push_str(" ORDER BY e.created_at");
        query_edges(conn, &sql, params)
    })
    .await
}

/// All edges in a tenant carrying a role label, optionally filtered by the
/// target's concrete kind.
pub async fn edges_with_label(
    db: &Db,
    tenant_id: &str,
    label: RoleLabel,
    target_kind: Option<EndpointKind>,
) -> Result<Vec<Edge>> {
    let tenant = tenant_id.to_string();
    db.with_connection(move |conn| {
        let mut sql = format!(
            "SELECT {EDGE_COLUMNS} FROM edges e \
             JOIN endpoints t ON t.endpoint_id = e.target_endpoint_id \
             WHERE e.tenant_id = ?1 AND e.role_label = ?2"
        );
        let mut params: Vec<Box<dyn ToSql>> =
            vec![Box::new(tenant), Box::new(label.as_str())];
        if let Some(kind) = target_kind {
            sql.push_str(" AND t.kind = ?3");
            params.push(Box::new(kind.as_str()));
        }
        sql.push_str(" ORDER BY e.created_at");
        query_edges(conn, &sql, params)
    })
    .await
}

/// Human-readable projection: "{source} is {role_label} {target}".
/// Derived on demand, never stored.
pub async fn describe(db: &Db, edge: &Edge) -> Result<String> {
    let edge = edge.clone();
    db.with_connection(move |conn| {
        let source = endpoint::endpoint_by_id(conn, &edge.source_endpoint_id)?;
        let target = endpoint::endpoint_by_id(conn, &edge.target_endpoint_id)?;
        let source = resolver::resolve_endpoint(conn, &source)?;
        let target = resolver::resolve_endpoint(conn, &target)?;
        Ok(format!(
            "{} is {} {}",
            source.display_name(),
            edge.role_label,
            target.display_name()
        ))
    })
    .await
}
