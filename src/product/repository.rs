//! Product Repository
//!
//! In-memory authoritative product store exposed as a loader and a saver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Product;
use crate::cache::CacheKey;
use crate::strategy::{Loader, Saver};

#[derive(Debug, Default)]
pub struct ProductRepository {
    rows: RwLock<HashMap<u64, Product>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl ProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find(&self, id: u64) -> Option<Product> {
        self.rows.read().await.get(&id).cloned()
    }

    /// Inserts or replaces a product.
    pub async fn upsert(&self, product: Product) -> Product {
        self.rows.write().await.insert(product.id, product.clone());
        product
    }

    pub async fn remove(&self, id: u64) -> Option<Product> {
        self.rows.write().await.remove(&id)
    }

    /// Loader invocations served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Saver invocations served so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn product_id(key: &CacheKey) -> anyhow::Result<u64> {
        let (_, id) = key
            .as_str()
            .split_once(':')
            .with_context(|| format!("key '{}' has no product id", key))?;
        id.parse()
            .with_context(|| format!("key '{}' has a non-numeric product id", key))
    }
}

#[async_trait]
impl Loader for ProductRepository {
    async fn load(&self, key: &CacheKey) -> anyhow::Result<Option<Vec<u8>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let id = Self::product_id(key)?;
        match self.find(id).await {
            Some(product) => Ok(Some(serde_json::to_vec(&product)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Saver for ProductRepository {
    async fn save(&self, key: &CacheKey, value: &[u8]) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let id = Self::product_id(key)?;
        let product: Product =
            serde_json::from_slice(value).context("value is not a product")?;
        anyhow::ensure!(
            product.id == id,
            "product id {} does not match key '{}'",
            product.id,
            key
        );
        self.upsert(product).await;
        Ok(())
    }
}
