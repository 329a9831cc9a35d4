//! Fine-grained Permissions

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::auth::Role;

/// Permission enum for fine-grained access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    // Graphs & reports
    GraphsRead,
    ReportsRead,

    // Proposals
    ProposalsRead,
    ProposalsWrite,
    ProposalsReview,

    // Snapshots & trends
    SnapshotsWrite,
    TrendsRead,

    // CI webhooks
    WebhooksRead,

    // Notifications
    NotificationsRead,
    NotificationsWrite,

    // Billing
    BillingRead,
    BillingManage,

    // Usage ingestion
    UsageWrite,

    // API Keys
    ApiKeysManage,

    // Cross-tenant statistics
    TenantsAdmin,

    // Admin
    Admin,
}

impl Permission {
    /// Get all permissions for a role
    pub fn for_role(role: Role) -> HashSet<Permission> {
        match role {
            Role::Admin => Self::all(),
            Role::Auditor => Self::auditor(),
            Role::Viewer => Self::viewer(),
        }
    }

    fn all() -> HashSet<Permission> {
        use Permission::*;
        [
            GraphsRead, ReportsRead,
            ProposalsRead, ProposalsWrite, ProposalsReview,
            SnapshotsWrite, TrendsRead,
            WebhooksRead,
            NotificationsRead, NotificationsWrite,
            BillingRead, BillingManage,
            UsageWrite,
            ApiKeysManage,
            TenantsAdmin,
            Admin,
        ].into_iter().collect()
    }

    fn auditor() -> HashSet<Permission> {
        use Permission::*;
        let mut perms = Self::viewer();
        perms.extend([ProposalsWrite, SnapshotsWrite, NotificationsWrite, UsageWrite]);
        perms
    }

    fn viewer() -> HashSet<Permission> {
        use Permission::*;
        [
            GraphsRead, ReportsRead, ProposalsRead, TrendsRead,
            WebhooksRead, NotificationsRead, BillingRead,
        ].into_iter().collect()
    }

    fn reads() -> Vec<Permission> {
        Self::viewer().into_iter().collect()
    }
}

/// Check if a set of permissions allows an action
pub fn has_permission(permissions: &HashSet<Permission>, required: Permission) -> bool {
    permissions.contains(&Permission::Admin) || permissions.contains(&required)
}

/// Parse permissions from scope strings (e.g., "graphs:read", "usage:write")
pub fn parse_scopes(scopes: &[String]) -> HashSet<Permission> {
    scopes.iter().flat_map(|s| {
        let parsed: Vec<Permission> = match s.as_str() {
            "graphs:read" => vec![Permission::GraphsRead],
            "reports:read" => vec![Permission::ReportsRead],
            "proposals:read" => vec![Permission::ProposalsRead],
            "proposals:write" => vec![Permission::ProposalsWrite],
            "proposals:review" => vec![Permission::ProposalsReview],
            "snapshots:write" => vec![Permission::SnapshotsWrite],
            "trends:read" => vec![Permission::TrendsRead],
            "webhooks:read" => vec![Permission::WebhooksRead],
            "notifications:read" => vec![Permission::NotificationsRead],
            "notifications:write" => vec![Permission::NotificationsWrite],
            "billing:read" => vec![Permission::BillingRead],
            "billing:manage" => vec![Permission::BillingManage],
            "usage:write" => vec![Permission::UsageWrite],
            "api_keys:manage" => vec![Permission::ApiKeysManage],
            "tenants:admin" => vec![Permission::TenantsAdmin],
            "admin" => vec![Permission::Admin],
            "read:all" => Permission::reads(),
            other => {
                tracing::debug!("Ignoring unknown scope: {}", other);
                Vec::new()
            }
        };
        parsed
    }).collect()
}

/// Effective permissions: the role's set, narrowed by scopes when any are given
pub fn effective_permissions(role: Role, scopes: &[String]) -> HashSet<Permission> {
    let granted = Permission::for_role(role);
    if scopes.is_empty() {
        return granted;
    }

    let requested = parse_scopes(scopes);
    if requested.contains(&Permission::Admin) && granted.contains(&Permission::Admin) {
        return granted;
    }
    granted.intersection(&requested).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_is_read_only() {
        let perms = Permission::for_role(Role::Viewer);
        assert!(has_permission(&perms, Permission::GraphsRead));
        assert!(has_permission(&perms, Permission::TrendsRead));
        assert!(!has_permission(&perms, Permission::ProposalsWrite));
        assert!(!has_permission(&perms, Permission::TenantsAdmin));
    }

    #[test]
    fn test_auditor_can_write_not_review() {
        let perms = Permission::for_role(Role::Auditor);
        assert!(has_permission(&perms, Permission::ProposalsWrite));
        assert!(has_permission(&perms, Permission::SnapshotsWrite));
        assert!(!has_permission(&perms, Permission::ProposalsReview));
        assert!(!has_permission(&perms, Permission::BillingManage));
    }

    #[test]
    fn test_admin_has_everything() {
        let perms = Permission::for_role(Role::Admin);
        assert!(has_permission(&perms, Permission::ProposalsReview));
        assert!(has_permission(&perms, Permission::ApiKeysManage));
    }

    #[test]
    fn test_scopes_narrow_role() {
        let scopes = vec!["usage:write".to_string(), "admin".to_string()];
        let perms = effective_permissions(Role::Auditor, &scopes);
        assert!(has_permission(&perms, Permission::UsageWrite));
        assert!(!has_permission(&perms, Permission::GraphsRead));
        // A scope cannot grant more than the role has
        assert!(!has_permission(&perms, Permission::Admin));
    }

    #[test]
    fn test_read_all_scope() {
        let perms = parse_scopes(&["read:all".to_string(), "bogus".to_string()]);
        assert!(perms.contains(&Permission::GraphsRead));
        assert!(perms.contains(&Permission::BillingRead));
        assert!(!perms.contains(&Permission::ProposalsWrite));
    }
}
