//! Paging and filter types shared by list endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tileerp_inventory::InventoryItemId;
use tileerp_products::ProductStatus;
use tileerp_sales::{OrderKind, SalesOrderStatus};

use crate::projections::stock_ledger::LedgerDirection;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// 1-based page request. Out-of-range values are clamped, not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn first_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE),
        }
        .normalized()
    }

    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: match self.per_page {
                0 => DEFAULT_PER_PAGE,
                n => n.min(MAX_PER_PAGE),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

/// Cut one page out of an already filtered and sorted list.
pub fn paginate<T>(items: Vec<T>, request: &PageRequest) -> Page<T> {
    let request = request.normalized();
    let total = items.len();
    let per_page = request.per_page as usize;
    let total_pages = total.div_ceil(per_page) as u32;
    let skip = (request.page as usize - 1).saturating_mul(per_page);

    Page {
        items: items.into_iter().skip(skip).take(per_page).collect(),
        total,
        page: request.page,
        per_page: request.per_page,
        total_pages,
    }
}

/// Case-insensitive substring match. An empty needle matches everything.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn within(at: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.is_none_or(|from| at >= from) && to.is_none_or(|to| at <= to)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductFilter {
    /// Matched against sku and name.
    pub search: Option<String>,
    pub status: Option<ProductStatus>,
    pub category: Option<String>,
}

impl ProductFilter {
    pub fn matches(&self, sku: &str, name: &str, status: ProductStatus, category: Option<&str>) -> bool {
        let search_ok = self
            .search
            .as_deref()
            .is_none_or(|q| contains_ci(sku, q) || contains_ci(name, q));
        let category_ok = match self.category.as_deref() {
            None => true,
            Some(wanted) => category.is_some_and(|c| c.eq_ignore_ascii_case(wanted)),
        };
        search_ok && category_ok && self.status.is_none_or(|s| s == status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SalesOrderFilter {
    pub status: Option<SalesOrderStatus>,
    pub kind: Option<OrderKind>,
    /// Matched against order number and customer name.
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl SalesOrderFilter {
    pub fn matches(
        &self,
        order_no: &str,
        customer: &str,
        status: SalesOrderStatus,
        kind: OrderKind,
        created_at: DateTime<Utc>,
    ) -> bool {
        self.status.is_none_or(|s| s == status)
            && self.kind.is_none_or(|k| k == kind)
            && self
                .search
                .as_deref()
                .is_none_or(|q| contains_ci(order_no, q) || contains_ci(customer, q))
            && within(created_at, self.created_from, self.created_to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LedgerFilter {
    pub item_id: Option<InventoryItemId>,
    pub direction: Option<LedgerDirection>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn matches(&self, item_id: InventoryItemId, direction: LedgerDirection, at: DateTime<Utc>) -> bool {
        self.item_id.is_none_or(|id| id == item_id)
            && self.direction.is_none_or(|d| d == direction)
            && within(at, self.from, self.to)
    }
}
