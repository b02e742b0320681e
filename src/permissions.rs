use serde::Serialize;

/// Platform capabilities the engine leans on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Reading recent foreground activity; without it every probe is unknown.
    UsageAccess,
    /// Drawing the block surface over other apps.
    Overlay,
    /// Exact wake timing; without it alarms fall back to inexact wakes.
    ExactAlarm,
    /// Posting the alarm notification.
    Notifications,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::UsageAccess,
        Permission::Overlay,
        Permission::ExactAlarm,
        Permission::Notifications,
    ];

    /// Blocking cannot work at all without these.
    pub fn is_required(self) -> bool {
        matches!(self, Permission::UsageAccess | Permission::Overlay)
    }
}

/// Grant status as reported by the platform. Missing grants never stop the
/// engine; they only lower enforcement fidelity.
pub trait Permissions: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;
}

/// Every permission not currently granted, in [`Permission::ALL`] order.
pub fn missing_permissions(permissions: &dyn Permissions) -> Vec<Permission> {
    Permission::ALL
        .into_iter()
        .filter(|permission| !permissions.is_granted(*permission))
        .collect()
}

/// Whether onboarding can be considered complete.
pub fn has_required_permissions(permissions: &dyn Permissions) -> bool {
    missing_permissions(permissions)
        .into_iter()
        .all(|permission| !permission.is_required())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Granted(HashSet<Permission>);

    impl Permissions for Granted {
        fn is_granted(&self, permission: Permission) -> bool {
            self.0.contains(&permission)
        }
    }

    #[test]
    fn reports_missing_in_stable_order() {
        let granted = Granted([Permission::Overlay].into());
        assert_eq!(
            missing_permissions(&granted),
            vec![
                Permission::UsageAccess,
                Permission::ExactAlarm,
                Permission::Notifications
            ]
        );
        assert!(!has_required_permissions(&granted));
    }

    #[test]
    fn optional_permissions_do_not_gate_onboarding() {
        let granted = Granted([Permission::UsageAccess, Permission::Overlay].into());
        assert!(has_required_permissions(&granted));
        assert_eq!(missing_permissions(&granted).len(), 2);
    }
}
