//! Piece/unit arithmetic.
//!
//! Forms accept a mixed quantity ("3 boxes and 2 pieces"); storage only ever
//! sees the total in pieces.

use serde::{Deserialize, Serialize};

use tileerp_core::{DomainError, DomainResult, ValueObject};

/// How many pieces one unit (box, crate, pallet) of a product holds. Never zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PiecesPerUnit(u32);

impl PiecesPerUnit {
    pub fn new(pieces: u32) -> DomainResult<Self> {
        if pieces == 0 {
            return Err(DomainError::validation("pieces_per_unit must be at least 1"));
        }
        Ok(Self(pieces))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for PiecesPerUnit {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PiecesPerUnit> for u32 {
    fn from(value: PiecesPerUnit) -> Self {
        value.0
    }
}

impl ValueObject for PiecesPerUnit {}

/// A quantity in mixed form. Not necessarily normalised: `{units: 1, pieces: 9}`
/// with 4 pieces per unit is a valid entry meaning 13 pieces.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default)]
    pub units: u64,
    #[serde(default)]
    pub pieces: u64,
}

impl ValueObject for Quantity {}

impl Quantity {
    pub const ZERO: Quantity = Quantity { units: 0, pieces: 0 };

    pub fn new(units: u64, pieces: u64) -> Self {
        Self { units, pieces }
    }

    pub fn pieces_only(pieces: u64) -> Self {
        Self { units: 0, pieces }
    }

    /// Normalised form of `total` pieces: as many whole units as fit, remainder in pieces.
    pub fn from_pieces(total: u64, per_unit: PiecesPerUnit) -> Self {
        let per_unit = u64::from(per_unit.get());
        Self {
            units: total / per_unit,
            pieces: total % per_unit,
        }
    }

    pub fn to_pieces(&self, per_unit: PiecesPerUnit) -> DomainResult<u64> {
        self.units
            .checked_mul(u64::from(per_unit.get()))
            .and_then(|p| p.checked_add(self.pieces))
            .ok_or_else(|| DomainError::validation("quantity is too large"))
    }

    pub fn normalize(&self, per_unit: PiecesPerUnit) -> DomainResult<Self> {
        Ok(Self::from_pieces(self.to_pieces(per_unit)?, per_unit))
    }

    pub fn is_normalized(&self, per_unit: PiecesPerUnit) -> bool {
        self.pieces < u64::from(per_unit.get())
    }

    pub fn is_zero(&self) -> bool {
        self.units == 0 && self.pieces == 0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} units + {} pieces", self.units, self.pieces)
    }
}

/// Whole units needed to hand over `total` pieces (rounds up).
pub fn units_to_cover(total: u64, per_unit: PiecesPerUnit) -> u64 {
    total.div_ceil(u64::from(per_unit.get()))
}
