//! Tile catalogue (event-sourced).
//!
//! A product carries its pack size (pieces per unit), per-piece pricing and
//! the stock band (low and overstock thresholds) used by inventory alerts.

pub mod product;

pub use product::{
    ActivateProduct, ArchiveProduct, CreateProduct, Pricing, Product, ProductActivated,
    ProductArchived, ProductCommand, ProductCreated, ProductDetailsUpdated, ProductEvent, ProductId,
    ProductPricingUpdated, ProductStatus, UpdatePricing, UpdateProductDetails,
};
