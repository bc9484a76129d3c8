//! The named cache instances of the inventory backend.
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stocktaker_cache::{ExpiringMemoCache, FetchError};

use crate::catalog::CatalogError;
use crate::config::{CacheConfig, CacheConfigs};
use crate::store::StoreError;
use crate::types::{BrandFilter, DashboardSummary, Product, StatsWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheName {
    Models,
    Colors,
    Dashboard,
}

impl CacheName {
    pub const ALL: [CacheName; 3] = [Self::Models, Self::Colors, Self::Dashboard];
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        match self {
            Self::Models => "models",
            Self::Colors => "colors",
            Self::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// An [`ExpiringMemoCache`] memoizing store queries, together with its name and settings.
pub struct NamedCache<K, V> {
    name: CacheName,
    join_timeout: Option<Duration>,
    cache: ExpiringMemoCache<K, V, StoreError>,
}

impl<K, V> fmt::Debug for NamedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedCache")
            .field("name", &self.name)
            .field("join_timeout", &self.join_timeout)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<K, V> NamedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: CacheName, config: CacheConfig) -> Self {
        let cache = match config.max_keys() {
            Some(max_keys) => ExpiringMemoCache::with_max_keys(name.as_ref(), config.ttl(), max_keys),
            None => ExpiringMemoCache::new(name.as_ref(), config.ttl()),
        };

        Self {
            name,
            join_timeout: config.join_timeout(),
            cache,
        }
    }

    pub fn name(&self) -> CacheName {
        self.name
    }

    /// The underlying memoization cache.
    pub fn cache(&self) -> &ExpiringMemoCache<K, V, StoreError> {
        &self.cache
    }

    /// Returns the memoized value for `key`, running `query` if there is none.
    ///
    /// Gives up waiting once the configured `join_timeout` elapses, in which case `query` keeps
    /// running and populates the cache in the background.
    pub async fn fetch<F>(&self, key: K, query: F) -> Result<V, CatalogError>
    where
        F: Future<Output = Result<V, StoreError>> + Send + 'static,
    {
        let name = self.name;
        let start = Instant::now();
        metric!(counter("caches.access") += 1, "cache" => name.as_ref());

        let query = async move {
            metric!(counter("caches.computation") += 1, "cache" => name.as_ref());
            let start = Instant::now();
            let result = query.await;
            let status = if result.is_ok() { "ok" } else { "error" };
            metric!(
                timer("caches.computation.duration") = start.elapsed(),
                "cache" => name.as_ref(),
                "status" => status,
            );
            result
        };

        let result = match self.join_timeout {
            Some(timeout) => self
                .cache
                .get_or_fetch_timeout(key, timeout, query)
                .await
                .map_err(|err| match err {
                    FetchError::Computation(err) => CatalogError::Store(err),
                    FetchError::TimedOut(timeout) => {
                        metric!(counter("caches.access.timeout") += 1, "cache" => name.as_ref());
                        CatalogError::Timeout {
                            cache: name,
                            timeout,
                        }
                    }
                }),
            None => self.cache.get_or_fetch(key, query).await.map_err(Into::into),
        };

        metric!(timer("caches.access.duration") = start.elapsed(), "cache" => name.as_ref());
        result
    }

    /// Sends the entry count and statistics of this cache as gauges.
    pub fn report_metrics(&self) {
        let name = self.name.as_ref();
        let stats = self.cache.stats();
        metric!(gauge("caches.entries") = self.cache.size() as u64, "cache" => name);
        metric!(gauge("caches.stats.hits") = stats.hits, "cache" => name);
        metric!(gauge("caches.stats.misses") = stats.misses, "cache" => name);
        metric!(gauge("caches.stats.joins") = stats.joins, "cache" => name);
        metric!(gauge("caches.stats.failures") = stats.failures, "cache" => name);
        metric!(gauge("caches.stats.discarded") = stats.discarded, "cache" => name);
        metric!(gauge("caches.stats.timeouts") = stats.timeouts, "cache" => name);
    }
}

/// All cache instances of the inventory backend.
#[derive(Debug)]
pub struct InventoryCaches {
    /// Distinct phone models, per brand or across all brands.
    pub models: NamedCache<BrandFilter, Arc<[String]>>,
    /// Distinct colors, per model.
    pub colors: NamedCache<String, Arc<[String]>>,
    /// Dashboard summaries, per time window.
    pub dashboard: NamedCache<StatsWindow, DashboardSummary>,
}

impl InventoryCaches {
    pub fn from_config(config: &CacheConfigs) -> Self {
        Self {
            models: NamedCache::new(CacheName::Models, config.models.into()),
            colors: NamedCache::new(CacheName::Colors, config.colors.into()),
            dashboard: NamedCache::new(CacheName::Dashboard, config.dashboard.into()),
        }
    }

    /// Drops every lookup that `product` contributes to.
    pub fn invalidate_product(&self, product: &Product) {
        tracing::debug!(
            product = %product.id,
            brand = %product.brand,
            model = %product.model,
            "Invalidating product lookups"
        );

        self.models
            .cache
            .delete(&BrandFilter::Brand(product.brand.clone()));
        self.models.cache.delete(&BrandFilter::All);
        metric!(counter("caches.invalidations") += 2, "cache" => CacheName::Models.as_ref());

        self.colors.cache.delete(product.model.as_str());
        metric!(counter("caches.invalidations") += 1, "cache" => CacheName::Colors.as_ref());

        self.invalidate_sales();
    }

    /// Drops all dashboard summaries.
    pub fn invalidate_sales(&self) {
        self.dashboard.cache.clear();
        metric!(counter("caches.invalidations") += 1, "cache" => CacheName::Dashboard.as_ref());
    }

    /// Sends gauges for all cache instances.
    pub fn report_metrics(&self) {
        self.models.report_metrics();
        self.colors.report_metrics();
        self.dashboard.report_metrics();
    }
}

#[cfg(test)]
mod tests {
    use stocktaker_cache::EntryState;

    use super::*;

    fn product(brand: &str, model: &str) -> Product {
        Product {
            id: crate::types::ProductId(1),
            brand: brand.into(),
            model: model.into(),
            color: "red".into(),
            stock: 1,
            price: 100,
        }
    }

    fn lookup(values: &[&str]) -> Result<Arc<[String]>, StoreError> {
        Ok(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn test_from_config() {
        let mut config = CacheConfigs::default();
        config.colors.max_keys = None;
        config.dashboard.ttl = Duration::from_secs(5);

        let caches = InventoryCaches::from_config(&config);
        assert_eq!(caches.models.cache().ttl(), Duration::from_secs(600));
        assert_eq!(caches.models.cache().max_keys(), Some(10_000));
        assert_eq!(caches.colors.cache().max_keys(), None);
        assert_eq!(caches.dashboard.cache().ttl(), Duration::from_secs(5));

        let names: Vec<_> = CacheName::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["models", "colors", "dashboard"]);
        assert_eq!(caches.dashboard.cache().name(), "dashboard");
    }

    #[tokio::test]
    async fn test_invalidate_product() {
        let caches = InventoryCaches::from_config(&CacheConfigs::default());

        for filter in [
            BrandFilter::All,
            BrandFilter::Brand("Acme".into()),
            BrandFilter::Brand("Globex".into()),
        ] {
            caches
                .models
                .fetch(filter, async { lookup(&["Rocket"]) })
                .await
                .unwrap();
        }
        for model in ["Rocket", "Orbit"] {
            caches
                .colors
                .fetch(model.into(), async { lookup(&["red"]) })
                .await
                .unwrap();
        }
        for window in StatsWindow::ALL {
            caches
                .dashboard
                .fetch(window, async { Ok(DashboardSummary::default()) })
                .await
                .unwrap();
        }

        caches.invalidate_product(&product("Acme", "Rocket"));

        let models = caches.models.cache();
        assert_eq!(models.state(&BrandFilter::All), EntryState::Empty);
        assert_eq!(
            models.state(&BrandFilter::Brand("Acme".into())),
            EntryState::Empty
        );
        assert_eq!(
            models.state(&BrandFilter::Brand("Globex".into())),
            EntryState::Fresh
        );
        assert!(!caches.colors.cache().has("Rocket"));
        assert!(caches.colors.cache().has("Orbit"));
        assert_eq!(caches.dashboard.cache().size(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_sales() {
        let caches = InventoryCaches::from_config(&CacheConfigs::default());

        caches
            .colors
            .fetch("Rocket".into(), async { lookup(&["red"]) })
            .await
            .unwrap();
        caches
            .dashboard
            .fetch(StatsWindow::Today, async { Ok(DashboardSummary::default()) })
            .await
            .unwrap();

        caches.invalidate_sales();

        assert!(!caches.dashboard.cache().has(&StatsWindow::Today));
        assert!(caches.colors.cache().has("Rocket"));

        // without a statsd client this only exercises the code paths
        caches.report_metrics();
    }
}
