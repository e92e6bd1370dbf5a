//! Assignment facade: reconcile "who is assigned to this work item" as a set
//! diff over assigned_to edges.
//!
//! The whole reconciliation runs in one transaction computed from one
//! snapshot of current edges. Validation of the incoming user ids is batched:
//! every missing, cross-tenant or person-less id is reported together in a
//! single error, and nothing is applied.

use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::db::Db;
use crate::directory;
use crate::error::{CaselinkError, Result};
use crate::graph::{edge, endpoint, EntityRef, RoleLabel};

/// Map of currently assigned user ids to their edge ids.
fn current_assignment_edges(
    conn: &Connection,
    tenant_id: &str,
    work_item_endpoint_id: &str,
) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(
        "SELECT u.user_id, e.edge_id FROM edges e \
         JOIN endpoints s ON s.endpoint_id = e.source_endpoint_id \
         JOIN users u ON u.partner_id = s.partner_id \
         WHERE e.tenant_id = ?1 AND e.target_endpoint_id = ?2 \
           AND e.role_label = ?3 AND s.kind = 'person'",
    )?;
    let rows = stmt.query_map(
        params![tenant_id, work_item_endpoint_id, RoleLabel::AssignedTo.as_str()],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )?;
    let mut map = HashMap::new();
    for row in rows {
        let (user_id, edge_id) = row?;
        map.insert(user_id, edge_id);
    }
    Ok(map)
}

/// Resolve a user id to the partner id of its Person record, collecting the
/// id into `offending` when the user is missing, cross-tenant, or has no
/// person partner.
fn person_of_user(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
    offending: &mut Vec<String>,
) -> Result<Option<String>> {
    let Some(user) = directory::user_by_id(conn, user_id)? else {
        offending.push(user_id.to_string());
        return Ok(None);
    };
    if user.tenant_id != tenant_id {
        offending.push(user_id.to_string());
        return Ok(None);
    }
    let Some(partner_id) = user.partner_id else {
        offending.push(user_id.to_string());
        return Ok(None);
    };
    match directory::partner_by_id(conn, &partner_id)? {
        Some(partner) if partner.is_person() => Ok(Some(partner_id)),
        _ => {
            offending.push(user_id.to_string());
            Ok(None)
        }
    }
}

/// Make the set of users assigned to a work item equal `desired_user_ids`.
///
/// Users already assigned keep their edge and assignment metadata untouched;
/// new users get an edge plus an assignments row recording who assigned them
/// and when; users no longer desired have their edge deleted (metadata
/// cascades). Atomic: any validation failure applies nothing.
pub async fn reconcile_assignments(
    db: &Db,
    work_item_id: &str,
    desired_user_ids: &[String],
    actor_user_id: &str,
) -> Result<()> {
    let work_item_id = work_item_id.to_string();
    let desired: HashSet<String> = desired_user_ids.iter().cloned().collect();
    let actor = actor_user_id.to_string();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        let item = directory::work_item_by_id(&tx, &work_item_id)?.ok_or_else(|| {
            CaselinkError::NotFound {
                what: "work item",
                id: work_item_id.clone(),
            }
        })?;
        let tenant_id = item.tenant_id.clone();
        let item_ref = EntityRef::WorkItem(item.work_item_id.clone());
        let item_ep = endpoint::endpoint_for(&tx, &item_ref)?;

        let actor_user = directory::user_by_id(&tx, &actor)?.ok_or_else(|| {
            CaselinkError::NotFound {
                what: "user",
                id: actor.clone(),
            }
        })?;
        if actor_user.tenant_id != tenant_id {
            return Err(CaselinkError::TenantMismatch(format!(
                "acting user {} belongs to tenant {}, work item belongs to tenant {}",
                actor, actor_user.tenant_id, tenant_id
            )));
        }

        let current = current_assignment_edges(&tx, &tenant_id, &item_ep.endpoint_id)?;

        let to_remove: Vec<&String> = current
            .iter()
            .filter(|(user_id, _)| !desired.contains(*user_id))
            .map(|(_, edge_id)| edge_id)
            .collect();
        let mut to_add: Vec<&String> = desired
            .iter()
            .filter(|user_id| !current.contains_key(*user_id))
            .collect();
        to_add.sort();

        // Batch validation: report every bad id at once, apply nothing.
        let mut offending = Vec::new();
        let mut add_partners = Vec::new();
        for user_id in &to_add {
            if let Some(partner_id) =
                person_of_user(&tx, &tenant_id, user_id.as_str(), &mut offending)?
            {
                add_partners.push(partner_id);
            }
        }
        if !offending.is_empty() {
            offending.sort();
            return Err(CaselinkError::UnresolvableUsers(offending));
        }

        let now = Utc::now().to_rfc3339();
        for partner_id in add_partners {
            let source = EntityRef::Person(partner_id);
            match edge::connect_in(&tx, &tenant_id, &source, &item_ref, RoleLabel::AssignedTo) {
                Ok(new_edge) => {
                    tx.execute(
                        "INSERT INTO assignments (assignment_id, tenant_id, edge_id, assigned_by, assigned_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            Uuid::new_v4().to_string(),
                            tenant_id,
                            new_edge.edge_id,
                            actor,
                            now
                        ],
                    )?;
                }
                // Concurrent writer already connected this user; idempotent
                // outcome, existing metadata stays.
                Err(CaselinkError::DuplicateEdge { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        for edge_id in to_remove {
            tx.execute("DELETE FROM edges WHERE edge_id = ?1", params![edge_id])?;
        }

        tx.commit()?;
        log::debug!(
            "Reconciled assignments for work item {} to {} user(s)",
            work_item_id,
            desired.len()
        );
        Ok(())
    })
    .await
}

/// The user ids currently assigned to a work item, sorted.
pub async fn current_assignees(db: &Db, work_item_id: &str) -> Result<Vec<String>> {
    let work_item_id = work_item_id.to_string();
    db.with_connection(move |conn| {
        let item = directory::work_item_by_id(conn, &work_item_id)?.ok_or_else(|| {
            CaselinkError::NotFound {
                what: "work item",
                id: work_item_id.clone(),
            }
        })?;
        let item_ref = EntityRef::WorkItem(item.work_item_id.clone());
        let Some(item_ep) = endpoint::find_endpoint(conn, &item_ref)? else {
            return Ok(Vec::new());
        };
        let current = current_assignment_edges(conn, &item.tenant_id, &item_ep.endpoint_id)?;
        let mut users: Vec<String> = current.into_keys().collect();
        users.sort();
        Ok(users)
    })
    .await
}
