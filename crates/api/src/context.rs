use tileerp_auth::{JwtClaims, Permission, Principal, PrincipalId, Role, TenantMembership, permissions_for_roles};
use tileerp_core::TenantId;

/// The company a request acts for. Taken from the token, never from the URL.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Authenticated staff member with permissions resolved from their roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        let permissions = permissions_for_roles(&roles);
        Self {
            principal_id,
            roles,
            permissions,
        }
    }

    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self::new(claims.sub, claims.roles.clone())
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// The principal as seen by the policy check for `tenant`.
    pub fn in_tenant(&self, tenant: &TenantContext) -> Principal {
        Principal {
            principal_id: self.principal_id,
            active_tenant_id: tenant.tenant_id(),
            membership: TenantMembership {
                tenant_id: tenant.tenant_id(),
                roles: self.roles.clone(),
                permissions: self.permissions.clone(),
            },
        }
    }
}
