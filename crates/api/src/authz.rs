//! Role-based authorization engine.
//!
//! Three layers combine into a decision:
//!
//! 1. the admin bypass (admin role or permanent-admin flag),
//! 2. the role-permission table, resolved into the JWT's permissions map
//!    at login and consulted for untargeted operations,
//! 3. for operations on a specific workflow, the intersection of the
//!    role's workflow capabilities with the effective permission the user
//!    holds on that workflow (ownership, or the best group share).

use std::collections::HashMap;
use std::str::FromStr;

use sqlx::PgPool;

use crate::error::{ApiError, ApiResult};

pub const ROLES: [&str; 3] = ["admin", "manager", "viewer"];
pub const PERMISSIONS: [&str; 4] = ["read", "write", "execute", "delete"];
pub const RESOURCE_TYPES: [&str; 4] = ["workflow", "user", "group", "system"];

/// Built-in user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Manager,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "viewer" => Ok(Role::Viewer),
            _ => Err(ApiError::Validation(
                "Invalid role. Must be admin, manager, or viewer".to_string(),
            )),
        }
    }
}

/// Operations a principal can perform on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    Read,
    Write,
    Execute,
    Delete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
            Permission::Delete => "delete",
        }
    }
}

impl FromStr for Permission {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "execute" => Ok(Permission::Execute),
            "delete" => Ok(Permission::Delete),
            _ => Err(ApiError::Validation(
                "Invalid permission. Must be read, write, delete, or execute".to_string(),
            )),
        }
    }
}

/// Permission a workflow share can carry (no delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharePermission {
    Read,
    Write,
    Execute,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::Read => "read",
            SharePermission::Write => "write",
            SharePermission::Execute => "execute",
        }
    }

    /// Ranking used to pick the best share across a user's groups: a
    /// write share grants strictly more than execute, which ties with
    /// read in effect but ranks above it for stability.
    fn rank(&self) -> u8 {
        match self {
            SharePermission::Read => 0,
            SharePermission::Execute => 1,
            SharePermission::Write => 2,
        }
    }

    /// What a share actually grants on the workflow: a read share allows
    /// running the workflow but not changing it.
    pub fn granted(&self) -> &'static [Permission] {
        match self {
            SharePermission::Read => &[Permission::Read, Permission::Execute],
            SharePermission::Write => &[Permission::Read, Permission::Write, Permission::Execute],
            SharePermission::Execute => &[Permission::Read, Permission::Execute],
        }
    }
}

impl FromStr for SharePermission {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(SharePermission::Read),
            "write" => Ok(SharePermission::Write),
            "execute" => Ok(SharePermission::Execute),
            _ => Err(ApiError::Validation(
                "Invalid share permission. Must be read, write, or execute".to_string(),
            )),
        }
    }
}

/// How a principal relates to a specific workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAccess {
    Owner,
    Shared(SharePermission),
    None,
}

impl WorkflowAccess {
    /// The effective permission set this access level grants.
    pub fn effective(&self) -> &'static [Permission] {
        match self {
            WorkflowAccess::Owner => &[
                Permission::Read,
                Permission::Write,
                Permission::Execute,
                Permission::Delete,
            ],
            WorkflowAccess::Shared(share) => share.granted(),
            WorkflowAccess::None => &[],
        }
    }
}

/// What each role may do on workflows it can reach. Distinct from the
/// role-permission table: this is the per-workflow capability ceiling,
/// intersected with the effective grant below.
pub fn role_workflow_capabilities(role: Role) -> &'static [Permission] {
    match role {
        Role::Admin => &[
            Permission::Read,
            Permission::Write,
            Permission::Execute,
            Permission::Delete,
        ],
        Role::Manager => &[Permission::Read, Permission::Write, Permission::Execute],
        Role::Viewer => &[Permission::Read, Permission::Execute],
    }
}

/// Decide an operation on a specific workflow.
pub fn allow_workflow_action(
    role: Role,
    is_permanent_admin: bool,
    access: WorkflowAccess,
    op: Permission,
) -> bool {
    if role == Role::Admin || is_permanent_admin {
        return true;
    }
    role_workflow_capabilities(role).contains(&op) && access.effective().contains(&op)
}

/// Decide an untargeted operation from the JWT permissions map.
pub fn allow_by_claims(
    permissions: &HashMap<String, Vec<String>>,
    role: &str,
    is_permanent_admin: bool,
    op: Permission,
    resource_type: &str,
) -> bool {
    if role == "admin" || is_permanent_admin {
        return true;
    }
    permissions
        .get(resource_type)
        .map(|granted| granted.iter().any(|p| p == op.as_str()))
        .unwrap_or(false)
}

/// Pick the strongest share among those reaching the user.
pub fn best_share(shares: &[SharePermission]) -> Option<SharePermission> {
    shares.iter().copied().max_by_key(|s| s.rank())
}

/// Resolve a user's relation to a workflow from its owner id and the
/// share rows reaching the user through group membership.
pub async fn resolve_workflow_access(
    pool: &PgPool,
    workflow_id: uuid::Uuid,
    owner_id: uuid::Uuid,
    user_id: uuid::Uuid,
) -> ApiResult<WorkflowAccess> {
    if owner_id == user_id {
        return Ok(WorkflowAccess::Owner);
    }

    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT ws.permission
        FROM workflow_shares ws
        JOIN user_group_assignments uga ON ws.group_id = uga.group_id
        WHERE ws.workflow_id = $1 AND uga.user_id = $2
        "#,
    )
    .bind(workflow_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let shares: Vec<SharePermission> = rows
        .iter()
        .filter_map(|(raw,)| raw.parse().ok())
        .collect();

    Ok(best_share(&shares)
        .map(WorkflowAccess::Shared)
        .unwrap_or(WorkflowAccess::None))
}

/// Default role-permission matrix seeded at startup. The admin rows are
/// the invariant the reconciler restores.
pub fn default_role_permissions() -> Vec<(&'static str, &'static str, &'static str)> {
    let mut rows = Vec::new();
    for resource in RESOURCE_TYPES {
        for permission in PERMISSIONS {
            rows.push(("admin", permission, resource));
        }
    }
    rows.extend([
        ("manager", "read", "workflow"),
        ("manager", "write", "workflow"),
        ("manager", "execute", "workflow"),
        ("manager", "read", "user"),
        ("manager", "read", "group"),
        ("manager", "write", "group"),
        ("manager", "read", "system"),
        ("viewer", "read", "workflow"),
        ("viewer", "read", "user"),
        ("viewer", "read", "group"),
        ("viewer", "read", "system"),
    ]);
    rows
}

/// Defaults for one non-admin role (used by the reset operation).
pub fn default_permissions_for_role(role: Role) -> Vec<(&'static str, &'static str)> {
    default_role_permissions()
        .into_iter()
        .filter(|(r, _, _)| *r == role.as_str())
        .map(|(_, p, rt)| (p, rt))
        .collect()
}

/// Fallback claim map when the role-permission table yields nothing for
/// a role.
pub fn default_claim_permissions(role: Role) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (permission, resource_type) in default_permissions_for_role(role) {
        map.entry(resource_type.to_string())
            .or_default()
            .push(permission.to_string());
    }
    map
}

/// Seed the role-permission table and reconcile the admin invariant:
/// every (admin × permission × resource_type) row must exist. Runs at
/// every startup.
pub async fn seed_and_reconcile_role_permissions(pool: &PgPool) -> ApiResult<()> {
    let mut inserted = 0;
    for (role, permission, resource_type) in default_role_permissions() {
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role, permission, resource_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (role, permission, resource_type) DO NOTHING
            "#,
        )
        .bind(role)
        .bind(permission)
        .bind(resource_type)
        .execute(pool)
        .await?;
        inserted += result.rows_affected();
    }

    let admin_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE role = 'admin'")
            .fetch_one(pool)
            .await?;

    let expected = (PERMISSIONS.len() * RESOURCE_TYPES.len()) as i64;
    if admin_rows < expected {
        tracing::error!(
            admin_rows = admin_rows,
            expected = expected,
            "Admin permission invariant violated after reconciliation"
        );
        return Err(ApiError::Internal);
    }

    tracing::info!(
        seeded = inserted,
        admin_rows = admin_rows,
        "Role permissions reconciled"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_role_bypasses_everything() {
        assert!(allow_workflow_action(
            Role::Admin,
            false,
            WorkflowAccess::None,
            Permission::Delete
        ));
    }

    #[test]
    fn permanent_admin_bypasses_regardless_of_role() {
        assert!(allow_workflow_action(
            Role::Viewer,
            true,
            WorkflowAccess::None,
            Permission::Delete
        ));
    }

    #[test]
    fn read_share_grants_execute_but_not_write() {
        // A viewer reached by a read share can read and execute the
        // workflow but not modify it.
        let access = WorkflowAccess::Shared(SharePermission::Read);
        assert!(allow_workflow_action(Role::Viewer, false, access, Permission::Read));
        assert!(allow_workflow_action(Role::Viewer, false, access, Permission::Execute));
        assert!(!allow_workflow_action(Role::Viewer, false, access, Permission::Write));
        assert!(!allow_workflow_action(Role::Viewer, false, access, Permission::Delete));
    }

    #[test]
    fn write_share_is_capped_by_role_capabilities() {
        // A write share offers write, but a viewer's capabilities cap it.
        let access = WorkflowAccess::Shared(SharePermission::Write);
        assert!(!allow_workflow_action(Role::Viewer, false, access, Permission::Write));
        assert!(allow_workflow_action(Role::Manager, false, access, Permission::Write));
    }

    #[test]
    fn manager_cannot_write_through_a_read_share() {
        let access = WorkflowAccess::Shared(SharePermission::Read);
        assert!(!allow_workflow_action(Role::Manager, false, access, Permission::Write));
        assert!(allow_workflow_action(Role::Manager, false, access, Permission::Execute));
    }

    #[test]
    fn owner_has_full_set_within_capabilities() {
        assert!(allow_workflow_action(Role::Manager, false, WorkflowAccess::Owner, Permission::Write));
        // Delete is outside manager capabilities even on owned workflows.
        assert!(!allow_workflow_action(Role::Manager, false, WorkflowAccess::Owner, Permission::Delete));
        assert!(allow_workflow_action(Role::Admin, false, WorkflowAccess::Owner, Permission::Delete));
    }

    #[test]
    fn no_access_denies_everything_for_non_admins() {
        for op in [Permission::Read, Permission::Write, Permission::Execute, Permission::Delete] {
            assert!(!allow_workflow_action(Role::Viewer, false, WorkflowAccess::None, op));
        }
    }

    #[test]
    fn best_share_prefers_write() {
        let best = best_share(&[
            SharePermission::Read,
            SharePermission::Write,
            SharePermission::Execute,
        ]);
        assert_eq!(best, Some(SharePermission::Write));
        assert_eq!(best_share(&[]), None);
    }

    #[test]
    fn claims_check_uses_resource_buckets() {
        let permissions = HashMap::from([(
            "workflow".to_string(),
            vec!["read".to_string()],
        )]);
        assert!(allow_by_claims(&permissions, "viewer", false, Permission::Read, "workflow"));
        assert!(!allow_by_claims(&permissions, "viewer", false, Permission::Write, "workflow"));
        assert!(!allow_by_claims(&permissions, "viewer", false, Permission::Read, "group"));
        assert!(allow_by_claims(&permissions, "admin", false, Permission::Delete, "system"));
    }

    #[test]
    fn every_built_in_role_parses() {
        for role in ROLES {
            assert!(role.parse::<Role>().is_ok());
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn default_matrix_has_full_admin_block() {
        let rows = default_role_permissions();
        let admin_rows: Vec<_> = rows.iter().filter(|(r, _, _)| *r == "admin").collect();
        assert_eq!(admin_rows.len(), 16);
        for resource in RESOURCE_TYPES {
            for permission in PERMISSIONS {
                assert!(rows.contains(&("admin", permission, resource)));
            }
        }
    }

    #[test]
    fn default_matrix_matches_spec_for_other_roles() {
        let rows = default_role_permissions();
        assert!(rows.contains(&("manager", "execute", "workflow")));
        assert!(!rows.contains(&("manager", "delete", "workflow")));
        assert!(!rows.contains(&("manager", "write", "user")));
        assert!(rows.contains(&("viewer", "read", "system")));
        assert!(!rows.contains(&("viewer", "write", "workflow")));
    }

    #[test]
    fn fallback_claims_group_by_resource() {
        let map = default_claim_permissions(Role::Manager);
        assert!(map["workflow"].contains(&"write".to_string()));
        assert!(map["group"].contains(&"read".to_string()));
        assert!(!map.contains_key("nonexistent"));
    }
}
