//! End-to-end graph scenarios against a migrated database.

use std::path::Path;

use tempfile::TempDir;

use caselink::db::{migrate, Db};
use caselink::directory::{
    create_organization, create_person, create_tenant, create_user, create_work_item,
};
use caselink::error::CaselinkError;
use caselink::graph::{
    assign_role, connect, current_assignees, describe, disconnect, edges_from, edges_to,
    reconcile_assignments, roles_of, RoleSpec, SystemRole,
};
use caselink::{EntityRef, RoleLabel};

async fn setup_db() -> (Db, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::new(temp_dir.path().join("caselink.db"));
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await
        .unwrap();
    (db, temp_dir)
}

/// Connect a person to a work item, describe the edge, hit the duplicate,
/// disconnect, and confirm the graph is empty again.
#[tokio::test]
async fn assignment_edge_lifecycle() {
    let (db, _temp) = setup_db().await;

    let tenant = create_tenant(&db, "Acme").await.unwrap();
    let person = create_person(&db, &tenant.tenant_id, "Petra", "Prill", "petra@acme.test", None)
        .await
        .unwrap();
    let item = create_work_item(&db, &tenant.tenant_id, "Wobbly desk")
        .await
        .unwrap();

    let source = EntityRef::Person(person.partner_id.clone());
    let target = EntityRef::WorkItem(item.work_item_id.clone());

    let edge = connect(&db, &tenant.tenant_id, &source, &target, RoleLabel::AssignedTo)
        .await
        .unwrap();
    assert_eq!(
        describe(&db, &edge).await.unwrap(),
        "Petra Prill is assigned_to Wobbly desk"
    );

    let err = connect(&db, &tenant.tenant_id, &source, &target, RoleLabel::AssignedTo)
        .await
        .unwrap_err();
    assert!(matches!(err, CaselinkError::DuplicateEdge { .. }));

    disconnect(&db, &edge.edge_id).await.unwrap();
    let remaining = edges_to(&db, &tenant.tenant_id, &target, None).await.unwrap();
    assert!(remaining.is_empty());
}

/// Edges and role facts are orthogonal: an employee_of edge and a system role
/// on the same person live side by side.
#[tokio::test]
async fn edges_and_roles_are_orthogonal() {
    let (db, _temp) = setup_db().await;

    let tenant = create_tenant(&db, "Acme").await.unwrap();
    let person = create_person(&db, &tenant.tenant_id, "Petra", "Prill", "petra@acme.test", None)
        .await
        .unwrap();
    let org = create_organization(&db, &tenant.tenant_id, "Acme GmbH", Some("HRB 1234"))
        .await
        .unwrap();

    let person_ref = EntityRef::Person(person.partner_id.clone());
    let org_ref = EntityRef::Organization(org.partner_id.clone());

    connect(&db, &tenant.tenant_id, &person_ref, &org_ref, RoleLabel::EmployeeOf)
        .await
        .unwrap();
    assign_role(
        &db,
        &tenant.tenant_id,
        &person_ref,
        RoleSpec::System(SystemRole::Agent),
    )
    .await
    .unwrap();

    let outgoing = edges_from(&db, &tenant.tenant_id, &person_ref, None)
        .await
        .unwrap();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].role_label, RoleLabel::EmployeeOf);

    let roles = roles_of(&db, &tenant.tenant_id, &person_ref).await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].spec, RoleSpec::System(SystemRole::Agent));
}

/// Reconciliation and direct edge creation share the same underlying edges,
/// so a manually connected assignee shows up in the reconciliation snapshot.
#[tokio::test]
async fn reconciliation_sees_directly_connected_edges() {
    let (db, _temp) = setup_db().await;

    let tenant = create_tenant(&db, "Acme").await.unwrap();
    let item = create_work_item(&db, &tenant.tenant_id, "Flickering light")
        .await
        .unwrap();

    let person = create_person(&db, &tenant.tenant_id, "Alice", "Ada", "alice@acme.test", None)
        .await
        .unwrap();
    let alice = create_user(&db, &tenant.tenant_id, "alice@acme.test", Some(&person.partner_id))
        .await
        .unwrap();
    let actor_person =
        create_person(&db, &tenant.tenant_id, "Ops", "Admin", "ops@acme.test", None)
            .await
            .unwrap();
    let actor = create_user(&db, &tenant.tenant_id, "ops@acme.test", Some(&actor_person.partner_id))
        .await
        .unwrap();

    // Connect directly, bypassing the facade.
    connect(
        &db,
        &tenant.tenant_id,
        &EntityRef::Person(person.partner_id.clone()),
        &EntityRef::WorkItem(item.work_item_id.clone()),
        RoleLabel::AssignedTo,
    )
    .await
    .unwrap();

    assert_eq!(
        current_assignees(&db, &item.work_item_id).await.unwrap(),
        vec![alice.user_id.clone()]
    );

    // Reconciling to the empty set removes the directly created edge too.
    reconcile_assignments(&db, &item.work_item_id, &[], &actor.user_id)
        .await
        .unwrap();
    assert!(current_assignees(&db, &item.work_item_id)
        .await
        .unwrap()
        .is_empty());
}

/// Tenant isolation holds across every entry point.
#[tokio::test]
async fn tenant_isolation_end_to_end() {
    let (db, _temp) = setup_db().await;

    let acme = create_tenant(&db, "Acme").await.unwrap();
    let rival = create_tenant(&db, "Rival").await.unwrap();

    let acme_person = create_person(&db, &acme.tenant_id, "Petra", "Prill", "p@acme.test", None)
        .await
        .unwrap();
    let rival_item = create_work_item(&db, &rival.tenant_id, "Rival ticket")
        .await
        .unwrap();

    let err = connect(
        &db,
        &acme.tenant_id,
        &EntityRef::Person(acme_person.partner_id.clone()),
        &EntityRef::WorkItem(rival_item.work_item_id.clone()),
        RoleLabel::AssignedTo,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CaselinkError::TenantMismatch(_)));

    let err = assign_role(
        &db,
        &rival.tenant_id,
        &EntityRef::Person(acme_person.partner_id.clone()),
        RoleSpec::System(SystemRole::Agent),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CaselinkError::TenantMismatch(_)));
}
