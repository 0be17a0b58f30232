//! Product Service
//!
//! Product operations expressed as explicit cache strategy calls.

use std::sync::Arc;

use tracing::info;

use super::{Product, ProductRepository, PRODUCT_TAG};
use crate::cache::CacheKey;
use crate::engine::CacheEngine;
use crate::error::Result;

#[derive(Clone)]
pub struct ProductService {
    engine: CacheEngine,
    repository: Arc<ProductRepository>,
}

impl ProductService {
    pub fn new(engine: CacheEngine, repository: Arc<ProductRepository>) -> Self {
        Self { engine, repository }
    }

    pub fn repository(&self) -> &Arc<ProductRepository> {
        &self.repository
    }

    pub fn product_key(id: u64) -> Result<CacheKey> {
        CacheKey::new(PRODUCT_TAG, id)
    }

    /// Read-through lookup. Missing products are not cached.
    pub async fn get_product(&self, id: u64) -> Result<Option<Product>> {
        let key = Self::product_key(id)?;
        self.engine
            .strategy
            .get_json(&key, self.repository.clone())
            .await
    }

    /// Stores a new product in the repository only; the cache fills on read.
    pub async fn create_product(&self, product: Product) -> Product {
        info!(id = product.id, "creating product");
        self.repository.upsert(product).await
    }

    /// Write-through update.
    pub async fn update_product(&self, id: u64, mut product: Product) -> Result<Product> {
        product.id = id;
        let key = Self::product_key(id)?;
        self.engine
            .strategy
            .put_json(&key, &product, self.repository.as_ref())
            .await?;
        Ok(product)
    }

    /// Write-behind update: visible immediately, persisted by the flush task.
    pub async fn update_product_async(&self, id: u64, mut product: Product) -> Result<Product> {
        product.id = id;
        let key = Self::product_key(id)?;
        self.engine
            .strategy
            .put_async(&key, serde_json::to_vec(&product)?)
            .await?;
        Ok(product)
    }

    /// Deletes from the repository, then evicts the cached copy.
    pub async fn delete_product(&self, id: u64) -> Result<bool> {
        let key = Self::product_key(id)?;
        let existed = self.repository.remove(id).await.is_some();
        self.engine.invalidation.evict(&key).await?;
        Ok(existed)
    }

    /// Evicts every cached product.
    pub async fn evict_all_products(&self) -> Result<usize> {
        self.engine.invalidation.evict_all(PRODUCT_TAG).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::config::Config;

    fn setup() -> ProductService {
        let engine = CacheEngine::new(Arc::new(InMemoryBackend::new()), &Config::default()).unwrap();
        ProductService::new(engine, Arc::new(ProductRepository::new()))
    }

    #[tokio::test]
    async fn test_get_caches_after_first_load() {
        let service = setup();
        service.create_product(Product::new(1, "Lamp", 1999)).await;

        let first = service.get_product(1).await.unwrap();
        let second = service.get_product(1).await.unwrap();

        assert_eq!(first, Some(Product::new(1, "Lamp", 1999)));
        assert_eq!(second, first);
        assert_eq!(service.repository().load_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_product() {
        let service = setup();
        assert_eq!(service.get_product(404).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_is_write_through() {
        let service = setup();
        service.create_product(Product::new(1, "Lamp", 1999)).await;
        service.get_product(1).await.unwrap();

        service
            .update_product(1, Product::new(0, "Lamp", 1499))
            .await
            .unwrap();

        assert_eq!(service.repository().find(1).await.unwrap().price_cents, 1499);
        assert_eq!(service.get_product(1).await.unwrap().unwrap().price_cents, 1499);
        assert_eq!(service.repository().load_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_evicts() {
        let service = setup();
        service.create_product(Product::new(1, "Lamp", 1999)).await;
        service.get_product(1).await.unwrap();

        assert!(service.delete_product(1).await.unwrap());
        assert_eq!(service.get_product(1).await.unwrap(), None);
        assert_eq!(service.repository().load_count(), 2);
    }

    #[tokio::test]
    async fn test_async_update_visible_before_persisted() {
        let service = setup();
        service.create_product(Product::new(1, "Lamp", 1999)).await;

        service
            .update_product_async(1, Product::new(1, "Lamp", 999))
            .await
            .unwrap();

        assert_eq!(service.get_product(1).await.unwrap().unwrap().price_cents, 999);
        assert_eq!(service.repository().find(1).await.unwrap().price_cents, 1999);
    }

    #[tokio::test]
    async fn test_evict_all_products() {
        let service = setup();
        for id in 1..=3 {
            service.create_product(Product::new(id, "Item", 100)).await;
            service.get_product(id).await.unwrap();
        }

        assert_eq!(service.evict_all_products().await.unwrap(), 3);
    }
}
