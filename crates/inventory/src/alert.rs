//! Low-stock classification.

use serde::{Deserialize, Serialize};

use crate::quantity::PiecesPerUnit;

/// Alert thresholds for one item, already converted to pieces.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    pub low_pieces: u64,
    pub high_pieces: Option<u64>,
}

impl StockThresholds {
    /// Thresholds are configured in units (boxes) on products and settings.
    pub fn from_units(low_units: u64, high_units: Option<u64>, per_unit: PiecesPerUnit) -> Self {
        let per_unit = u64::from(per_unit.get());
        Self {
            low_pieces: low_units.saturating_mul(per_unit),
            high_pieces: high_units.map(|h| h.saturating_mul(per_unit)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    OutOfStock,
    Low,
    Normal,
    Overstocked,
}

impl StockLevel {
    pub fn needs_reorder(self) -> bool {
        matches!(self, StockLevel::OutOfStock | StockLevel::Low)
    }
}

/// Classify by what can still be sold (`available`); overstock looks at what
/// is physically held (`on_hand`).
pub fn classify(available: u64, on_hand: u64, thresholds: &StockThresholds) -> StockLevel {
    if available == 0 {
        return StockLevel::OutOfStock;
    }
    if available <= thresholds.low_pieces {
        return StockLevel::Low;
    }
    match thresholds.high_pieces {
        Some(high) if on_hand > high => StockLevel::Overstocked,
        _ => StockLevel::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(low: u64, high: Option<u64>) -> StockThresholds {
        StockThresholds::from_units(low, high, PiecesPerUnit::new(4).unwrap())
    }

    #[test]
    fn thresholds_are_converted_to_pieces() {
        assert_eq!(thresholds(5, Some(100)), StockThresholds { low_pieces: 20, high_pieces: Some(400) });
    }

    #[test]
    fn classification_boundaries() {
        let t = thresholds(5, Some(100));
        assert_eq!(classify(0, 10, &t), StockLevel::OutOfStock);
        assert_eq!(classify(20, 20, &t), StockLevel::Low);
        assert_eq!(classify(21, 21, &t), StockLevel::Normal);
        assert_eq!(classify(21, 401, &t), StockLevel::Overstocked);
    }

    #[test]
    fn fully_reserved_stock_is_out_of_stock() {
        let t = thresholds(0, None);
        assert_eq!(classify(0, 50, &t), StockLevel::OutOfStock);
        assert!(StockLevel::OutOfStock.needs_reorder());
        assert!(!StockLevel::Normal.needs_reorder());
    }
}
