use axum::http::StatusCode;
use axum::response::Response;

use tileerp_auth::{CommandAuthorization, Permission};
use tileerp_core::AggregateId;

use crate::app::errors;
use crate::context::{PrincipalContext, TenantContext};

/// Associates the permissions a command needs with the command itself.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, permission: &'static str) -> Self {
        Self {
            inner,
            required: vec![Permission::new(permission)],
        }
    }

    /// Hand back the command if the caller holds every required permission.
    pub fn authorized(self, tenant: &TenantContext, principal: &PrincipalContext) -> Result<C, Response> {
        match crate::authz::authorize_command(tenant, principal, &self) {
            Ok(()) => Ok(self.inner),
            Err(e) => Err(errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())),
        }
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

pub fn parse_id(raw: &str, what: &str) -> Result<AggregateId, Response> {
    raw.parse::<AggregateId>()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
