//! Memoized catalog and dashboard lookups on top of an [`InventoryStore`].
//!
//! Reads are answered through the [`InventoryCaches`], so that concurrent requests for the same
//! lookup share a single store query and repeated requests are served from memory until the
//! configured time-to-live elapses. Successful writes synchronously drop every cached lookup they
//! affect before returning, so a caller never reads its own write from a stale cache entry.

use std::sync::Arc;
use std::time::Duration;

use crate::caches::{CacheName, InventoryCaches};
use crate::store::{InventoryStore, StoreError};
use crate::types::{
    BrandFilter, DashboardSummary, NewProduct, Product, ProductId, Sale, StatsWindow,
};

/// Errors returned by the [`CatalogService`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Waiting for the lookup took longer than the configured join timeout.
    #[error("timed out after {timeout:?} waiting for the {cache} cache")]
    Timeout { cache: CacheName, timeout: Duration },
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn InventoryStore>,
    caches: Arc<InventoryCaches>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn InventoryStore>, caches: Arc<InventoryCaches>) -> Self {
        Self { store, caches }
    }

    pub fn caches(&self) -> &InventoryCaches {
        &self.caches
    }

    /// Returns the distinct phone models, optionally restricted to one brand.
    pub async fn phone_models(&self, brand: Option<&str>) -> Result<Arc<[String]>, CatalogError> {
        let filter = BrandFilter::from(brand);
        let store = Arc::clone(&self.store);
        let query_filter = filter.clone();
        let query = async move { store.distinct_models(&query_filter).await.map(Arc::from) };

        self.caches.models.fetch(filter, query).await
    }

    /// Returns the distinct colors that `model` is available in.
    pub async fn colors(&self, model: &str) -> Result<Arc<[String]>, CatalogError> {
        let store = Arc::clone(&self.store);
        let owned_model = model.to_owned();
        let query = async move { store.distinct_colors(&owned_model).await.map(Arc::from) };

        self.caches.colors.fetch(model.to_owned(), query).await
    }

    /// Returns the dashboard numbers for `window`.
    pub async fn dashboard(&self, window: StatsWindow) -> Result<DashboardSummary, CatalogError> {
        let store = Arc::clone(&self.store);
        let query = async move { store.dashboard_summary(window).await };

        self.caches.dashboard.fetch(window, query).await
    }

    pub async fn insert_product(&self, product: NewProduct) -> Result<Product, CatalogError> {
        let product = self.store.insert_product(product).await?;
        tracing::info!(product = %product.id, "Inserted product");
        self.caches.invalidate_product(&product);
        Ok(product)
    }

    pub async fn update_stock(&self, id: ProductId, stock: u32) -> Result<Product, CatalogError> {
        let product = self.store.update_stock(id, stock).await?;
        tracing::info!(product = %product.id, stock, "Updated stock");
        self.caches.invalidate_product(&product);
        Ok(product)
    }

    pub async fn delete_product(&self, id: ProductId) -> Result<Product, CatalogError> {
        let product = self.store.delete_product(id).await?;
        tracing::info!(product = %product.id, "Deleted product");
        self.caches.invalidate_product(&product);
        Ok(product)
    }

    pub async fn record_sale(&self, id: ProductId, quantity: u32) -> Result<Sale, CatalogError> {
        let sale = self.store.record_sale(id, quantity).await?;
        tracing::info!(product = %id, quantity, "Recorded sale");
        self.caches.invalidate_sales();
        Ok(sale)
    }
}

#[cfg(test)]
mod tests {
    use stocktaker_cache::{CacheStats, EntryState};
    use stocktaker_test as test;

    use super::*;
    use crate::config::CacheConfigs;
    use crate::store::InMemoryStore;

    const LATENCY: Duration = Duration::from_millis(100);

    fn phone(brand: &str, model: &str, color: &str) -> NewProduct {
        NewProduct {
            brand: brand.into(),
            model: model.into(),
            color: color.into(),
            stock: 10,
            price: 50_000,
        }
    }

    fn setup_with(config: CacheConfigs) -> (Arc<InMemoryStore>, CatalogService) {
        test::setup();
        let store = Arc::new(InMemoryStore::with_products(
            LATENCY,
            [
                phone("Acme", "Rocket", "red"),
                phone("Acme", "Rocket", "blue"),
                phone("Globex", "Orbit", "black"),
            ],
        ));
        let caches = Arc::new(InventoryCaches::from_config(&config));
        let service = CatalogService::new(store.clone(), caches);
        (store, service)
    }

    fn setup() -> (Arc<InMemoryStore>, CatalogService) {
        setup_with(CacheConfigs::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_query() {
        let (store, service) = setup();

        let results =
            futures::future::join_all((0..10).map(|_| service.phone_models(None))).await;
        for models in results {
            assert_eq!(&*models.unwrap(), ["Orbit", "Rocket"]);
        }
        assert_eq!(store.queries(), 1);

        let stats = service.caches().models.cache().stats();
        assert_eq!(
            stats,
            CacheStats {
                misses: 1,
                joins: 9,
                ..Default::default()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_expire() {
        let mut config = CacheConfigs::default();
        config.colors.ttl = Duration::from_secs(60);
        let (store, service) = setup_with(config);

        service.colors("Rocket").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        service.colors("Rocket").await.unwrap();
        assert_eq!(store.queries(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(
            service.caches().colors.cache().state("Rocket"),
            EntryState::Stale
        );
        service.colors("Rocket").await.unwrap();
        assert_eq!(store.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_invalidates_affected_lookups() {
        let (store, service) = setup();

        assert_eq!(&*service.phone_models(None).await.unwrap(), ["Orbit", "Rocket"]);
        assert_eq!(&*service.phone_models(Some("Globex")).await.unwrap(), ["Orbit"]);
        assert_eq!(&*service.colors("Rocket").await.unwrap(), ["blue", "red"]);
        assert_eq!(&*service.colors("Orbit").await.unwrap(), ["black"]);
        let before = service.dashboard(StatsWindow::All).await.unwrap();
        assert_eq!(store.queries(), 5);

        service
            .insert_product(phone("Acme", "Anvil", "red"))
            .await
            .unwrap();
        service
            .insert_product(phone("Acme", "Rocket", "green"))
            .await
            .unwrap();

        // reads after the write observe it
        assert_eq!(
            &*service.phone_models(None).await.unwrap(),
            ["Anvil", "Orbit", "Rocket"]
        );
        assert_eq!(
            &*service.colors("Rocket").await.unwrap(),
            ["blue", "green", "red"]
        );
        let after = service.dashboard(StatsWindow::All).await.unwrap();
        assert_eq!(after.products, before.products + 2);
        assert_eq!(store.queries(), 8);

        // lookups for other brands and models are still cached
        service.phone_models(Some("Globex")).await.unwrap();
        service.colors("Orbit").await.unwrap();
        assert_eq!(store.queries(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sale_invalidates_dashboard_only() {
        let (store, service) = setup();

        service.colors("Rocket").await.unwrap();
        let before = service.dashboard(StatsWindow::Today).await.unwrap();
        assert_eq!(before.sales, 0);

        service.record_sale(ProductId(1), 3).await.unwrap();
        assert_eq!(
            service.caches().dashboard.cache().state(&StatsWindow::Today),
            EntryState::Empty
        );

        let after = service.dashboard(StatsWindow::Today).await.unwrap();
        assert_eq!(after.sales, 1);
        assert_eq!(after.units_sold, 3);
        assert_eq!(after.revenue, 150_000);

        service.colors("Rocket").await.unwrap();
        assert_eq!(store.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_invalidates_nothing() {
        let (store, service) = setup();

        service.dashboard(StatsWindow::Week).await.unwrap();
        service.phone_models(Some("Acme")).await.unwrap();

        let err = service.record_sale(ProductId(1), 100).await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Store(StoreError::InsufficientStock { .. })
        ));
        let err = service.delete_product(ProductId(42)).await.unwrap_err();
        assert_eq!(err, CatalogError::Store(StoreError::NotFound(ProductId(42))));

        let caches = service.caches();
        assert_eq!(
            caches.dashboard.cache().state(&StatsWindow::Week),
            EntryState::Fresh
        );
        assert_eq!(
            caches.models.cache().state(&BrandFilter::Brand("Acme".into())),
            EntryState::Fresh
        );
        assert_eq!(store.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failures_are_not_cached() {
        let (store, service) = setup();

        store.set_unavailable(true);
        let err = service.colors("Rocket").await.unwrap_err();
        assert_eq!(err.to_string(), "backing store unavailable: connection refused");
        assert!(!service.caches().colors.cache().has("Rocket"));

        store.set_unavailable(false);
        assert_eq!(&*service.colors("Rocket").await.unwrap(), ["blue", "red"]);
        assert_eq!(store.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout() {
        let mut config = CacheConfigs::default();
        config.dashboard.join_timeout = Some(Duration::from_millis(10));
        let (store, service) = setup_with(config);

        let err = service.dashboard(StatsWindow::Month).await.unwrap_err();
        assert_eq!(
            err,
            CatalogError::Timeout {
                cache: CacheName::Dashboard,
                timeout: Duration::from_millis(10),
            }
        );
        insta::assert_snapshot!(err, @"timed out after 10ms waiting for the dashboard cache");

        // the query keeps running and populates the cache
        tokio::time::sleep(LATENCY).await;
        assert_eq!(
            service.caches().dashboard.cache().state(&StatsWindow::Month),
            EntryState::Fresh
        );
        service.dashboard(StatsWindow::Month).await.unwrap();
        assert_eq!(store.queries(), 1);
    }
}
