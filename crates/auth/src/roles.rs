use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role name as carried in the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static role policy.
///
/// - `admin`: everything
/// - `sales`: orders, payments and returns
/// - `warehouse`: stock movements and the product catalogue
///
/// Unknown roles (e.g. `viewer`) grant nothing beyond reading.
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = Vec::new();
    for role in roles {
        let granted: &[&'static str] = match role.as_str() {
            "admin" => &["*"],
            "sales" => &[Permission::SALES_WRITE, Permission::SALES_PAYMENTS],
            "warehouse" => &[Permission::INVENTORY_WRITE, Permission::PRODUCTS_WRITE],
            _ => &[],
        };
        for name in granted {
            let perm = Permission::new(*name);
            if !out.contains(&perm) {
                out.push(perm);
            }
        }
    }
    out
}
