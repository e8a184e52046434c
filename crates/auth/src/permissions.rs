use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Opaque permission name such as `"inventory.write"`. `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const PRODUCTS_WRITE: &'static str = "products.write";
    pub const INVENTORY_WRITE: &'static str = "inventory.write";
    pub const SALES_WRITE: &'static str = "sales.write";
    pub const SALES_PAYMENTS: &'static str = "sales.payments";
    pub const SETTINGS_WRITE: &'static str = "settings.write";

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
