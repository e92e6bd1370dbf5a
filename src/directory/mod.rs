//! Directory entities: tenants, partners (people and organizations), users
//! and work items. The relationship graph resolves its endpoints against
//! these rows; everything here is tenant-owned and cascade-deleted with its
//! tenant.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Db;
use crate::error::{CaselinkError, Result};

/// Isolation boundary; every entity and edge belongs to exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub name: String,
    pub created_at: String,
}

/// The two partner shapes. One table, `kind` tag plus variant columns;
/// no table inheritance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartnerVariant {
    Person {
        first_name: String,
        last_name: String,
        email: String,
        phone: Option<String>,
    },
    Organization {
        name: String,
        registration_number: Option<String>,
    },
}

/// An actor that can participate in the graph: a person or an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    pub partner_id: String,
    pub tenant_id: String,
    pub variant: PartnerVariant,
    pub created_at: String,
}

impl Partner {
    pub fn is_person(&self) -> bool {
        matches!(self.variant, PartnerVariant::Person { .. })
    }

    /// "First Last" for persons, the organization name otherwise.
    pub fn display_name(&self) -> String {
        match &self.variant {
            PartnerVariant::Person {
                first_name,
                last_name,
                ..
            } => format!("{} {}", first_name, last_name),
            PartnerVariant::Organization { name, .. } => name.clone(),
        }
    }
}

/// Login-capable identity. `partner_id` links the user to its Person record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub tenant_id: String,
    pub partner_id: Option<String>,
    pub email: String,
    pub created_at: String,
}

/// Ticket/case/job. Opaque to the graph beyond id, tenant and title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub work_item_id: String,
    pub tenant_id: String,
    pub title: String,
    pub created_at: String,
}

// --- row loaders (used inside graph transactions) ---

pub(crate) fn tenant_by_id(conn: &Connection, tenant_id: &str) -> Result<Option<Tenant>> {
    conn.query_row(
        "SELECT tenant_id, name, created_at FROM tenants WHERE tenant_id = ?1",
        params![tenant_id],
        |row| {
            Ok(Tenant {
                tenant_id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(CaselinkError::Database)
}

pub(crate) fn partner_by_id(conn: &Connection, partner_id: &str) -> Result<Option<Partner>> {
    let row = conn
        .query_row(
            "SELECT partner_id, tenant_id, kind, first_name, last_name, email, phone, \
             org_name, registration_number, created_at \
             FROM partners WHERE partner_id = ?1",
            params![partner_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            },
        )
        .optional()
        .map_err(CaselinkError::Database)?;

    let Some((id, tenant_id, kind, first, last, email, phone, org_name, reg, created_at)) = row
    else {
        return Ok(None);
    };

    let variant = match kind.as_str() {
        "person" => PartnerVariant::Person {
            first_name: first.unwrap_or_default(),
            last_name: last.unwrap_or_default(),
            email: email.unwrap_or_default(),
            phone,
        },
        "organization" => PartnerVariant::Organization {
            name: org_name.unwrap_or_default(),
            registration_number: reg,
        },
        other => {
            return Err(CaselinkError::InvalidReference(format!(
                "partner {} has unknown kind '{}'",
                id, other
            )))
        }
    };

    Ok(Some(Partner {
        partner_id: id,
        tenant_id,
        variant,
        created_at,
    }))
}

pub(crate) fn user_by_id(conn: &Connection, user_id: &str) -> Result<Option<User>> {
    conn.query_row(
        "SELECT user_id, tenant_id, partner_id, email, created_at FROM users WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(User {
                user_id: row.get(0)?,
                tenant_id: row.get(1)?,
                partner_id: row.get(2)?,
                email: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(CaselinkError::Database)
}

pub(crate) fn work_item_by_id(conn: &Connection, work_item_id: &str) -> Result<Option<WorkItem>> {
    conn.query_row(
        "SELECT work_item_id, tenant_id, title, created_at FROM work_items WHERE work_item_id = ?1",
        params![work_item_id],
        |row| {
            Ok(WorkItem {
                work_item_id: row.get(0)?,
                tenant_id: row.get(1)?,
                title: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(CaselinkError::Database)
}

fn require_tenant(conn: &Connection, tenant_id: &str) -> Result<Tenant> {
    tenant_by_id(conn, tenant_id)?.ok_or_else(|| CaselinkError::NotFound {
        what: "tenant",
        id: tenant_id.to_string(),
    })
}

// --- creation / lookup API ---

pub async fn create_tenant(db: &Db, name: &str) -> Result<Tenant> {
    let tenant = Tenant {
        tenant_id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    let row = tenant.clone();
    db.with_connection(move |conn| {
        conn.execute(
            "INSERT INTO tenants (tenant_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![row.tenant_id, row.name, row.created_at],
        )?;
        Ok(())
    })
    .await?;
    log::debug!("Created tenant {} ({})", tenant.name, tenant.tenant_id);
    Ok(tenant)
}

pub async fn create_person(
    db: &Db,
    tenant_id: &str,
    first_name: &str,
    last_name: &str,
    email: &str,
    phone: Option<&str>,
) -> Result<Partner> {
    let partner = Partner {
        partner_id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        variant: PartnerVariant::Person {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            phone: phone.map(String::from),
        },
        created_at: Utc::now().to_rfc3339(),
    };
    let (id, tenant, created) = (
        partner.partner_id.clone(),
        partner.tenant_id.clone(),
        partner.created_at.clone(),
    );
    let (first, last, mail, tel) = (
        first_name.to_string(),
        last_name.to_string(),
        email.to_string(),
        phone.map(String::from),
    );
    db.with_connection(move |conn| {
        require_tenant(conn, &tenant)?;
        conn.execute(
            "INSERT INTO partners (partner_id, tenant_id, kind, first_name, last_name, email, phone, created_at) \
             VALUES (?1, ?2, 'person', ?3, ?4, ?5, ?6, ?7)",
            params![id, tenant, first, last, mail, tel, created],
        )?;
        Ok(())
    })
    .await?;
    Ok(partner)
}

pub async fn create_organization(
    db: &Db,
    tenant_id: &str,
    name: &str,
    registration_number: Option<&str>,
) -> Result<Partner> {
    let partner = Partner {
        partner_id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        variant: PartnerVariant::Organization {
            name: name.to_string(),
            registration_number: registration_number.map(String::from),
        },
        created_at: Utc::now().to_rfc3339(),
    };
    let (id, tenant, created) = (
        partner.partner_id.clone(),
        partner.tenant_id.clone(),
        partner.created_at.clone(),
    );
    let (org_name, reg) = (name.to_string(), registration_number.map(String::from));
    db.with_connection(move |conn| {
        require_tenant(conn, &tenant)?;
        conn.execute(
            "INSERT INTO partners (partner_id, tenant_id, kind, org_name, registration_number, created_at) \
             VALUES (?1, ?2, 'organization', ?3, ?4, ?5)",
            params![id, tenant, org_name, reg, created],
        )?;
        Ok(())
    })
    .await?;
    Ok(partner)
}

pub async fn create_work_item(db: &Db, tenant_id: &str, title: &str) -> Result<WorkItem> {
    let item = WorkItem {
        work_item_id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        title: title.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    let row = item.clone();
    db.with_connection(move |conn| {
        require_tenant(conn, &row.tenant_id)?;
        conn.execute(
            "INSERT INTO work_items (work_item_id, tenant_id, title, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![row.work_item_id, row.tenant_id, row.title, row.created_at],
        )?;
        Ok(())
    })
    .await?;
    Ok(item)
}

/// Create a user, optionally linked to its Person partner record.
///
/// The partner must exist and belong to the same tenant as the user.
pub async fn create_user(
    db: &Db,
    tenant_id: &str,
    email: &str,
    partner_id: Option<&str>,
) -> Result<User> {
    let user = User {
        user_id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        partner_id: partner_id.map(String::from),
        email: email.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    let row = user.clone();
    db.with_connection(move |conn| {
        require_tenant(conn, &row.tenant_id)?;
        if let Some(pid) = &row.partner_id {
            let partner = partner_by_id(conn, pid)?.ok_or_else(|| CaselinkError::NotFound {
                what: "partner",
                id: pid.clone(),
            })?;
            if partner.tenant_id != row.tenant_id {
                return Err(CaselinkError::TenantMismatch(format!(
                    "partner {} belongs to tenant {}, user belongs to tenant {}",
                    pid, partner.tenant_id, row.tenant_id
                )));
            }
        }
        conn.execute(
            "INSERT INTO users (user_id, tenant_id, partner_id, email, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.user_id, row.tenant_id, row.partner_id, row.email, row.created_at],
        )?;
        Ok(())
    })
    .await?;
    Ok(user)
}

pub async fn get_partner(db: &Db, partner_id: &str) -> Result<Partner> {
    let id = partner_id.to_string();
    db.with_connection(move |conn| {
        partner_by_id(conn, &id)?.ok_or_else(|| CaselinkError::NotFound {
            what: "partner",
            id: id.clone(),
        })
    })
    .await
}

pub async fn get_user(db: &Db, user_id: &str) -> Result<User> {
    let id = user_id.to_string();
    db.with_connection(move |conn| {
        user_by_id(conn, &id)?.ok_or_else(|| CaselinkError::NotFound {
            what: "user",
            id: id.clone(),
        })
    })
    .await
}

pub async fn get_work_item(db: &Db, work_item_id: &str) -> Result<WorkItem> {
    let id = work_item_id.to_string();
    db.with_connection(move |conn| {
        work_item_by_id(conn, &id)?.ok_or_else(|| CaselinkError::NotFound {
            what: "work item",
            id: id.clone(),
        })
    })
    .await
}
