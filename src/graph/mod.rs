//! Relationship graph: typed, directed, role-labeled edges between
//! polymorphic endpoints.
//!
//! An endpoint wraps exactly one concrete entity (person, organization or
//! work item) and tags it with a discriminant; edges connect two endpoints
//! under a role label read from the source's perspective ("source is
//! role-label of target"). Tenant isolation is checked before every mutation.

mod assign;
mod edge;
mod endpoint;
mod resolver;
mod role;

pub use assign::{current_assignees, reconcile_assignments};
pub use edge::{connect, describe, disconnect, edges_from, edges_to, edges_with_label};
pub use endpoint::endpoint_for_entity;
pub use resolver::{resolve_entity, ResolvedEntity};
pub use role::{
    assign_role, create_custom_role, revoke_role, roles_of, CustomRole, RoleAssignment, RoleSpec,
    SystemRole,
};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CaselinkError, Result};

/// A typed reference to exactly one concrete entity.
///
/// This is the unit edges connect; the variant is the discriminant, so a
/// reference can never point at zero or two entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Person(String),
    Organization(String),
    WorkItem(String),
}

impl EntityRef {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Person(_) => EndpointKind::Person,
            Self::Organization(_) => EndpointKind::Organization,
            Self::WorkItem(_) => EndpointKind::WorkItem,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Person(id) | Self::Organization(id) | Self::WorkItem(id) => id,
        }
    }
}

/// Endpoint discriminant as stored in the `endpoints.kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Person,
    Organization,
    WorkItem,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::WorkItem => "work_item",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "person" => Some(Self::Person),
            "organization" => Some(Self::Organization),
            "work_item" => Some(Self::WorkItem),
            _ => None,
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed edge vocabulary, read from the source's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleLabel {
    AssignedTo,
    EmployeeOf,
    Customer,
    Vendor,
    Reporter,
    DependsOn,
    Blocks,
}

impl RoleLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssignedTo => "assigned_to",
            Self::EmployeeOf => "employee_of",
            Self::Customer => "customer",
            Self::Vendor => "vendor",
            Self::Reporter => "reporter",
            Self::DependsOn => "depends_on",
            Self::Blocks => "blocks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assigned_to" => Some(Self::AssignedTo),
            "employee_of" => Some(Self::EmployeeOf),
            "customer" => Some(Self::Customer),
            "vendor" => Some(Self::Vendor),
            "reporter" => Some(Self::Reporter),
            "depends_on" => Some(Self::DependsOn),
            "blocks" => Some(Self::Blocks),
            _ => None,
        }
    }
}

impl fmt::Display for RoleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored endpoint row: discriminant plus exactly one concrete reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub endpoint_id: String,
    pub kind: EndpointKind,
    pub partner_id: Option<String>,
    pub work_item_id: Option<String>,
    pub created_at: String,
}

impl Endpoint {
    /// The wrapped entity as a typed reference.
    ///
    /// Validates that exactly one concrete reference is set and that it
    /// matches the stored discriminant.
    pub fn entity_ref(&self) -> Result<EntityRef> {
        match (self.kind, &self.partner_id, &self.work_item_id) {
            (EndpointKind::Person, Some(p), None) => Ok(EntityRef::Person(p.clone())),
            (EndpointKind::Organization, Some(p), None) => Ok(EntityRef::Organization(p.clone())),
            (EndpointKind::WorkItem, None, Some(w)) => Ok(EntityRef::WorkItem(w.clone())),
            _ => Err(CaselinkError::InvalidReference(format!(
                "endpoint {} does not reference exactly one {} entity",
                self.endpoint_id, self.kind
            ))),
        }
    }
}

/// A directed, role-labeled, tenant-scoped connection between two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: String,
    pub tenant_id: String,
    pub source_endpoint_id: String,
    pub target_endpoint_id: String,
    pub role_label: RoleLabel,
    pub created_at: String,
}
