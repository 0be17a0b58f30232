//! Product Module
//!
//! Product catalogue served through the engine: the repository is the
//! authoritative store, the service chooses a cache strategy per operation.

mod repository;
mod service;

use serde::{Deserialize, Serialize};

pub use repository::ProductRepository;
pub use service::ProductService;

/// Type tag of product cache keys.
pub const PRODUCT_TAG: &str = "product";

/// A catalogue product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub price_cents: u64,
}

impl Product {
    pub fn new(id: u64, name: impl Into<String>, price_cents: u64) -> Self {
        Self {
            id,
            name: name.into(),
            price_cents,
        }
    }
}
