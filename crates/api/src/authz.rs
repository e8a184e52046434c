//! Command-boundary authorization.
//!
//! Checked in the handler before dispatch, so aggregates and infra stay
//! unaware of roles and permissions.

use tileerp_auth::{AuthzError, CommandAuthorization, authorize};

use crate::context::{PrincipalContext, TenantContext};

/// Check every permission the command requires against the caller's roles.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let principal = principal.in_tenant(tenant);

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileerp_auth::{Permission, PrincipalId, Role};
    use tileerp_core::TenantId;

    use crate::app::routes::common::CmdAuth;

    fn check(role: &str, perm: &'static str) -> Result<(), AuthzError> {
        let tenant = TenantContext::new(TenantId::new());
        let principal = PrincipalContext::new(PrincipalId::new(), vec![Role::new(role.to_string())]);
        authorize_command(&tenant, &principal, &CmdAuth::new((), perm))
    }

    #[test]
    fn roles_grant_scoped_permissions() {
        assert!(check("admin", Permission::SETTINGS_WRITE).is_ok());
        assert!(check("warehouse", Permission::INVENTORY_WRITE).is_ok());
        assert!(check("warehouse", Permission::SALES_WRITE).is_err());
        assert!(check("sales", Permission::SALES_PAYMENTS).is_ok());
        assert!(check("viewer", Permission::PRODUCTS_WRITE).is_err());
    }

    #[test]
    fn permissions_are_resolved_once_per_request() {
        let principal = PrincipalContext::new(
            PrincipalId::new(),
            vec![Role::new("sales"), Role::new("warehouse"), Role::new("sales")],
        );
        let names: Vec<&str> = principal.permissions().iter().map(|p| p.as_str()).collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains(&Permission::INVENTORY_WRITE));
    }
}
