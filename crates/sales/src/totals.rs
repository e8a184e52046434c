//! Order rollups: revenue, cost, profit and what is still owed.
//!
//! All amounts are in the smallest currency unit. Quantities are pieces.

use serde::{Deserialize, Serialize};

use crate::order::{PaymentRecord, ReturnRecord, SalesOrderLine};

/// Largest amount an order may carry, so every rollup fits a signed figure.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

fn sum(amounts: impl Iterator<Item = u64>) -> u64 {
    amounts.fold(0u64, u64::saturating_add)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
}

/// Per-line revenue, cost and profit on the quantity the customer kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFigures {
    pub line_no: u32,
    pub revenue: u64,
    pub cost: u64,
    pub profit: i64,
}

impl LineFigures {
    pub fn of(line: &SalesOrderLine) -> Self {
        let kept = line.quantity.saturating_sub(line.returned);
        let revenue = kept.saturating_mul(line.unit_price);
        let cost = kept.saturating_mul(line.unit_cost.unwrap_or(0));
        Self {
            line_no: line.line_no,
            revenue,
            cost,
            profit: signed(revenue).saturating_sub(signed(cost)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    /// Sum of ordered quantity x unit price.
    pub subtotal: u64,
    pub discount: u64,
    pub freight: u64,
    /// `subtotal - discount + freight`.
    pub total: u64,
    /// Value of returned goods credited back to the customer.
    pub credited: u64,
    pub adjusted_total: u64,
    pub cost_total: u64,
    pub gross_profit: i64,
    /// Gross margin in basis points of net revenue after discount.
    pub margin_bps: i64,
    pub paid: u64,
    pub refunded: u64,
    pub net_paid: u64,
    /// Negative when the customer is owed money.
    pub balance_due: i64,
    pub payment_status: PaymentStatus,
}

pub fn subtotal(lines: &[SalesOrderLine]) -> u64 {
    sum(lines.iter().map(|l| l.quantity.saturating_mul(l.unit_price)))
}

pub fn compute(
    lines: &[SalesOrderLine],
    discount: u64,
    freight: u64,
    payments: &[PaymentRecord],
    returns: &[ReturnRecord],
) -> OrderTotals {
    let subtotal = subtotal(lines);
    let total = subtotal.saturating_sub(discount).saturating_add(freight);
    let credited = sum(returns.iter().map(|r| r.credit_amount));
    let adjusted_total = total.saturating_sub(credited);

    let figures: Vec<LineFigures> = lines.iter().map(LineFigures::of).collect();
    let net_revenue = sum(figures.iter().map(|f| f.revenue));
    let cost_total = sum(figures.iter().map(|f| f.cost));
    let profit_base = net_revenue.saturating_sub(discount);
    let gross_profit = signed(profit_base).saturating_sub(signed(cost_total));
    let margin_bps = if profit_base == 0 {
        0
    } else {
        gross_profit.saturating_mul(10_000) / signed(profit_base)
    };

    let paid = sum(payments.iter().map(|p| p.amount));
    let refunded = sum(returns.iter().map(|r| r.refund_amount));
    let net_paid = paid.saturating_sub(refunded);
    let balance_due = signed(adjusted_total).saturating_sub(signed(net_paid));

    let payment_status = if balance_due > 0 {
        if net_paid == 0 {
            PaymentStatus::Unpaid
        } else {
            PaymentStatus::Partial
        }
    } else if net_paid == 0 && credited == 0 {
        PaymentStatus::Unpaid
    } else {
        PaymentStatus::Paid
    };

    OrderTotals {
        subtotal,
        discount,
        freight,
        total,
        credited,
        adjusted_total,
        cost_total,
        gross_profit,
        margin_bps,
        paid,
        refunded,
        net_paid,
        balance_due,
        payment_status,
    }
}
