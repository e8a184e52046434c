use std::collections::HashSet;

use thiserror::Error;

use tileerp_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership};

/// Caller resolved for an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Implemented by anything the API checks before dispatching.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Pure policy check of one permission within the principal's active tenant.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let perms: HashSet<&str> = principal
        .membership
        .permissions
        .iter()
        .map(|p| p.as_str())
        .collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Role, permissions_for_roles};

    fn principal(tenant: TenantId, roles: &[&'static str]) -> Principal {
        let roles: Vec<Role> = roles.iter().map(|r| Role::new(*r)).collect();
        Principal {
            principal_id: PrincipalId::new(),
            active_tenant_id: tenant,
            membership: TenantMembership {
                tenant_id: tenant,
                permissions: permissions_for_roles(&roles),
                roles,
            },
        }
    }

    #[test]
    fn warehouse_may_move_stock_but_not_take_payments() {
        let p = principal(TenantId::new(), &["warehouse"]);
        assert!(authorize(&p, &Permission::new(Permission::INVENTORY_WRITE)).is_ok());
        assert_eq!(
            authorize(&p, &Permission::new(Permission::SALES_PAYMENTS)),
            Err(AuthzError::Forbidden("sales.payments".to_string()))
        );
    }

    #[test]
    fn wildcard_allows_anything() {
        let p = principal(TenantId::new(), &["admin"]);
        assert!(authorize(&p, &Permission::new("settings.write")).is_ok());
    }

    #[test]
    fn membership_of_another_tenant_is_rejected() {
        let mut p = principal(TenantId::new(), &["admin"]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::new("*")),
            Err(AuthzError::TenantMismatch)
        );
    }
}
