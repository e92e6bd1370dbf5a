//! Role facts attached to endpoints, independent of any edge.
//!
//! A target holds either a system-defined role or a tenant-defined custom
//! role. `RoleSpec` is a closed sum type, so "both set" cannot be expressed
//! at the API boundary; the row CHECK and load-time validation guard the
//! storage representation, and the partial unique indexes keep a target from
//! holding the same role twice.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{is_unique_violation, CaselinkError, Result};
use crate::graph::{endpoint, resolver, EntityRef};

/// Deployment-fixed roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    Admin,
    Agent,
    Customer,
}

impl SystemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Agent => "agent",
            Self::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "agent" => Some(Self::Agent),
            "customer" => Some(Self::Customer),
            _ => None,
        }
    }
}

impl fmt::Display for SystemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one of a system role or a tenant-defined custom role (by id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleSpec {
    System(SystemRole),
    Custom(String),
}

/// Tenant-defined role vocabulary entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRole {
    pub custom_role_id: String,
    pub tenant_id: String,
    pub key: String,
    pub label: String,
    pub created_at: String,
}

/// A stored role fact on a target endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_assignment_id: String,
    pub tenant_id: String,
    pub target_endpoint_id: String,
    pub spec: RoleSpec,
    pub created_at: String,
}

fn custom_role_by_id(conn: &Connection, custom_role_id: &str) -> Result<Option<CustomRole>> {
    conn.query_row(
        "SELECT custom_role_id, tenant_id, key, label, created_at \
         FROM custom_roles WHERE custom_role_id = ?1",
        params![custom_role_id],
        |row| {
            Ok(CustomRole {
                custom_role_id: row.get(0)?,
                tenant_id: row.get(1)?,
                key: row.get(2)?,
                label: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(CaselinkError::Database)
}

/// Build a `RoleSpec` from the two nullable columns of a stored row.
fn spec_from_columns(
    row_id: &str,
    system_role: Option<String>,
    custom_role_id: Option<String>,
) -> Result<RoleSpec> {
    match (system_role, custom_role_id) {
        (Some(s), None) => {
            let role = SystemRole::parse(&s).ok_or_else(|| {
                CaselinkError::InvalidReference(format!(
                    "role assignment {} carries unknown system role '{}'",
                    row_id, s
                ))
            })?;
            Ok(RoleSpec::System(role))
        }
        (None, Some(id)) => Ok(RoleSpec::Custom(id)),
        _ => Err(CaselinkError::AmbiguousRole),
    }
}

/// Define a custom role in a tenant's vocabulary.
pub async fn create_custom_role(
    db: &Db,
    tenant_id: &str,
    key: &str,
    label: &str,
) -> Result<CustomRole> {
    let role = CustomRole {
        custom_role_id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        key: key.to_string(),
        label: label.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    let row = role.clone();
    db.with_connection(move |conn| {
        let inserted = conn.execute(
            "INSERT INTO custom_roles (custom_role_id, tenant_id, key, label, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.custom_role_id, row.tenant_id, row.key, row.label, row.created_at],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CaselinkError::DuplicateRole(format!(
                "custom role key '{}' already exists in this tenant",
                row.key
            ))),
            Err(e) => Err(CaselinkError::Database(e)),
        }
    })
    .await?;
    Ok(role)
}

/// Attach a role to a target entity's endpoint.
pub async fn assign_role(
    db: &Db,
    tenant_id: &str,
    target: &EntityRef,
    spec: RoleSpec,
) -> Result<RoleAssignment> {
    let tenant = tenant_id.to_string();
    let target = target.clone();
    db.with_connection(move |conn| {
        let tx = conn.transaction()?;

        let resolved = resolver::resolve(&tx, &target)?;
        if resolved.tenant_id() != tenant {
            return Err(CaselinkError::TenantMismatch(format!(
                "'{}' belongs to tenant {}, role belongs to tenant {}",
                resolved.display_name(),
                resolved.tenant_id(),
                tenant
            )));
        }

        if let RoleSpec::Custom(custom_role_id) = &spec {
            let custom = custom_role_by_id(&tx, custom_role_id)?.ok_or_else(|| {
                CaselinkError::NotFound {
                    what: "custom role",
                    id: custom_role_id.clone(),
                }
            })?;
            if custom.tenant_id != tenant {
                return Err(CaselinkError::TenantMismatch(format!(
                    "custom role '{}' belongs to tenant {}, role belongs to tenant {}",
                    custom.key, custom.tenant_id, tenant
                )));
            }
        }

        let target_ep = endpoint::endpoint_for(&tx, &target)?;

        let assignment = RoleAssignment {
            role_assignment_id: Uuid::new_v4().to_string(),
            tenant_id: tenant.clone(),
            target_endpoint_id: target_ep.endpoint_id.clone(),
            spec: spec.clone(),
            created_at: Utc::now().to_rfc3339(),
        };
        let (system_role, custom_role_id) = match &spec {
            RoleSpec::System(role) => (Some(role.as_str().to_string()), None),
            RoleSpec::Custom(id) => (None, Some(id.clone())),
        };

        let inserted = tx.execute(
            "INSERT INTO role_assignments \
             (role_assignment_id, tenant_id, target_endpoint_id, system_role, custom_role_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                assignment.role_assignment_id,
                assignment.tenant_id,
                assignment.target_endpoint_id,
                system_role,
                custom_role_id,
                assignment.created_at
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                let description = match &spec {
                    RoleSpec::System(role) => format!("system role '{}'", role),
                    RoleSpec::Custom(id) => format!("custom role '{}'", id),
                };
                return Err(CaselinkError::DuplicateRole(format!(
                    "target already holds {}",
                    description
                )));
            }
            Err(e) => return Err(CaselinkError::Database(e)),
        }

        tx.commit()?;
        Ok(assignment)
    })
    .await
}

/// Remove a role fact.
pub async fn revoke_role(db: &Db, role_assignment_id: &str) -> Result<()> {
    let id = role_assignment_id.to_string();
    db.with_connection(move |conn| {
        let deleted = conn.execute(
            "DELETE FROM role_assignments WHERE role_assignment_id = ?1",
            params![id],
        )?;
        if deleted == 0 {
            return Err(CaselinkError::NotFound {
                what: "role assignment",
                id: id.clone(),
            });
        }
        Ok(())
    })
    .await
}

/// All role facts held by a target entity.
pub async fn roles_of(db: &Db, tenant_id: &str, target: &EntityRef) -> Result<Vec<RoleAssignment>> {
    let tenant = tenant_id.to_string();
    let target = target.clone();
    db.with_connection(move |conn| {
        let Some(ep) = endpoint::find_endpoint(conn, &target)? else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(
            "SELECT role_assignment_id, tenant_id, target_endpoint_id, system_role, custom_role_id, created_at \
             FROM role_assignments \
             WHERE tenant_id = ?1 AND target_endpoint_id = ?2 \
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![tenant, ep.endpoint_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut assignments = Vec::new();
        for row in rows {
            let (id, tenant_id, target_endpoint_id, system_role, custom_role_id, created_at) =
                row?;
            let spec = spec_from_columns(&id, system_role, custom_role_id)?;
            assignments.push(RoleAssignment {
                role_assignment_id: id,
                tenant_id,
                target_endpoint_id,
                spec,
                created_at,
            });
        }
        Ok(assignments)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;
    use crate::directory::{create_person, create_tenant};
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
    async fn test_assign_system_role_once() {
        let (db, _temp) = setup_test_db().await;
        let tenant = create_tenant(&db, "Acme").await.unwrap();
        let person = create_person(&db, &tenant.tenant_id, "Ada", "Lovelace", "ada@acme.test", None)
            .await
            .unwrap();
        let target = EntityRef::Person(person.partner_id.clone());

        let assignment = assign_role(
            &db,
            &tenant.tenant_id,
            &target,
            RoleSpec::System(SystemRole::Agent),
        )
        .await
        .unwrap();
        assert_eq!(assignment.spec, RoleSpec::System(SystemRole::Agent));

        let err = assign_role(
            &db,
            &tenant.tenant_id,
            &target,
            RoleSpec::System(SystemRole::Agent),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CaselinkError::DuplicateRole(_)));

        // A different system role on the same target is fine.
        assign_role(
            &db,
            &tenant.tenant_id,
            &target,
            RoleSpec::System(SystemRole::Admin),
        )
        .await
        .unwrap();

        let roles = roles_of(&db, &tenant.tenant_id, &target).await.unwrap();
        assert_eq!(roles.len(), 2);
    }

    #[tokio::test]
    async fn test_custom_role_lifecycle() {
        let (db, _temp) = setup_test_db().await;
        let tenant = create_tenant(&db, "Acme").await.unwrap();
        let person = create_person(&db, &tenant.tenant_id, "Ada", "Lovelace", "ada@acme.test", None)
            .await
            .unwrap();
        let target = EntityRef::Person(person.partner_id.clone());

        let role = create_custom_role(&db, &tenant.tenant_id, "escalation-contact", "Escalation contact")
            .await
            .unwrap();

        // Duplicate key in the same tenant is rejected.
        let err = create_custom_role(&db, &tenant.tenant_id, "escalation-contact", "Other label")
            .await
            .unwrap_err();
        assert!(matches!(err, CaselinkError::DuplicateRole(_)));

        let assignment = assign_role(
            &db,
            &tenant.tenant_id,
            &target,
            RoleSpec::Custom(role.custom_role_id.clone()),
        )
        .await
        .unwrap();

        let err = assign_role(
            &db,
            &tenant.tenant_id,
            &target,
            RoleSpec::Custom(role.custom_role_id.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CaselinkError::DuplicateRole(_)));

        revoke_role(&db, &assignment.role_assignment_id).await.unwrap();
        let roles = roles_of(&db, &tenant.tenant_id, &target).await.unwrap();
        assert!(roles.is_empty());

        let err = revoke_role(&db, &assignment.role_assignment_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CaselinkError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_assign_cross_tenant_custom_role_rejected() {
        let (db, _temp) = setup_test_db().await;
        let t1 = create_tenant(&db, "T1").await.unwrap();
        let t2 = create_tenant(&db, "T2").await.unwrap();
        let person = create_person(&db, &t1.tenant_id, "Ada", "Lovelace", "ada@t1.test", None)
            .await
            .unwrap();
        let foreign_role = create_custom_role(&db, &t2.tenant_id, "vip", "VIP").await.unwrap();

        let err = assign_role(
            &db,
            &t1.tenant_id,
            &EntityRef::Person(person.partner_id.clone()),
            RoleSpec::Custom(foreign_role.custom_role_id.clone()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CaselinkError::TenantMismatch(_)));
    }

    #[tokio::test]
    async fn test_malformed_role_row_is_ambiguous() {
        let err = spec_from_columns("r1", None, None).unwrap_err();
        assert!(matches!(err, CaselinkError::AmbiguousRole));
        let err =
            spec_from_columns("r1", Some("admin".into()), Some("c1".into())).unwrap_err();
        assert!(matches!(err, CaselinkError::AmbiguousRole));
    }
}
