use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use super::{InventoryStore, StoreError};
use crate::types::{
    BrandFilter, DashboardSummary, NewProduct, Product, ProductId, Sale, StatsWindow,
};

/// Products with at most this many units in stock count as "low stock".
pub const LOW_STOCK_THRESHOLD: u32 = 5;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    products: BTreeMap<ProductId, Product>,
    sales: Vec<Sale>,
}

/// An [`InventoryStore`] that keeps everything in memory.
///
/// Every read query sleeps for a configurable latency before answering, to stand in for a real
/// database. The store can also be switched to "unavailable", in which case all operations fail.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    latency: Duration,
    unavailable: AtomicBool,
    queries: AtomicUsize,
}

impl InMemoryStore {
    /// Creates an empty store that answers queries after `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    /// Creates a store pre-populated with `products`.
    pub fn with_products(latency: Duration, products: impl IntoIterator<Item = NewProduct>) -> Self {
        let store = Self::new(latency);
        {
            let mut state = store.state();
            for product in products {
                state.insert(product);
            }
        }
        store
    }

    /// Switches the store between available and unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// The number of read queries answered so far, including failed ones.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    /// Simulates the round trip of a read query.
    async fn query(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        self.check_available()?;
        Ok(self.state())
    }
}

impl State {
    fn insert(&mut self, product: NewProduct) -> Product {
        self.next_id += 1;
        let product = product.with_id(ProductId(self.next_id));
        self.products.insert(product.id, product.clone());
        product
    }

    fn product_mut(&mut self, id: ProductId) -> Result<&mut Product, StoreError> {
        self.products.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn distinct_models(&self, filter: &BrandFilter) -> Result<Vec<String>, StoreError> {
        let state = self.query().await?;
        let models: BTreeSet<_> = state
            .products
            .values()
            .filter(|product| filter.matches(product))
            .map(|product| product.model.as_str())
            .collect();
        Ok(models.into_iter().map(str::to_owned).collect())
    }

    async fn distinct_colors(&self, model: &str) -> Result<Vec<String>, StoreError> {
        let state = self.query().await?;
        let colors: BTreeSet<_> = state
            .products
            .values()
            .filter(|product| product.model == model)
            .map(|product| product.color.as_str())
            .collect();
        Ok(colors.into_iter().map(str::to_owned).collect())
    }

    async fn dashboard_summary(
        &self,
        window: StatsWindow,
    ) -> Result<DashboardSummary, StoreError> {
        let state = self.query().await?;
        let now = SystemTime::now();

        let mut summary = DashboardSummary {
            products: state.products.len() as u64,
            ..Default::default()
        };
        for product in state.products.values() {
            summary.units_in_stock += u64::from(product.stock);
            if product.stock <= LOW_STOCK_THRESHOLD {
                summary.low_stock += 1;
            }
        }

        let in_window = |sale: &&Sale| match window.max_age() {
            // sales "from the future" because of clock skew are counted as recent
            Some(max_age) => now.duration_since(sale.sold_at).unwrap_or_default() <= max_age,
            None => true,
        };
        for sale in state.sales.iter().filter(in_window) {
            summary.sales += 1;
            summary.units_sold += u64::from(sale.quantity);
            summary.revenue += sale.amount;
        }

        Ok(summary)
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        self.check_available()?;
        if product.brand.trim().is_empty() || product.model.trim().is_empty() {
            return Err(StoreError::Invalid("brand and model are required".into()));
        }
        Ok(self.state().insert(product))
    }

    async fn update_stock(&self, id: ProductId, stock: u32) -> Result<Product, StoreError> {
        self.check_available()?;
        let mut state = self.state();
        let product = state.product_mut(id)?;
        product.stock = stock;
        Ok(product.clone())
    }

    async fn delete_product(&self, id: ProductId) -> Result<Product, StoreError> {
        self.check_available()?;
        self.state()
            .products
            .remove(&id)
            .ok_or(StoreError::NotFound(id))
    }

    async fn record_sale(&self, id: ProductId, quantity: u32) -> Result<Sale, StoreError> {
        self.check_available()?;
        if quantity == 0 {
            return Err(StoreError::Invalid("quantity must be positive".into()));
        }

        let mut state = self.state();
        let product = state.product_mut(id)?;
        if product.stock < quantity {
            return Err(StoreError::InsufficientStock {
                product: id,
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;

        let sale = Sale {
            product: id,
            quantity,
            amount: product.price * u64::from(quantity),
            sold_at: SystemTime::now(),
        };
        state.sales.push(sale.clone());
        Ok(sale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(brand: &str, model: &str, color: &str, stock: u32) -> NewProduct {
        NewProduct {
            brand: brand.into(),
            model: model.into(),
            color: color.into(),
            stock,
            price: 10_000,
        }
    }

    #[tokio::test]
    async fn test_distinct_lookups() {
        let store = InMemoryStore::with_products(
            Duration::ZERO,
            [
                phone("Acme", "Rocket", "red", 10),
                phone("Acme", "Rocket", "blue", 10),
                phone("Acme", "Anvil", "black", 1),
                phone("Globex", "Orbit", "red", 3),
            ],
        );

        let all = store.distinct_models(&BrandFilter::All).await.unwrap();
        assert_eq!(all, ["Anvil", "Orbit", "Rocket"]);

        let acme = store
            .distinct_models(&BrandFilter::Brand("Acme".into()))
            .await
            .unwrap();
        assert_eq!(acme, ["Anvil", "Rocket"]);

        let colors = store.distinct_colors("Rocket").await.unwrap();
        assert_eq!(colors, ["blue", "red"]);

        assert_eq!(store.queries(), 3);
    }

    #[tokio::test]
    async fn test_sales_update_dashboard() {
        let store = InMemoryStore::with_products(
            Duration::ZERO,
            [phone("Acme", "Rocket", "red", 10), phone("Acme", "Anvil", "black", 1)],
        );

        let sale = store.record_sale(ProductId(1), 6).await.unwrap();
        assert_eq!(sale.amount, 60_000);

        let err = store.record_sale(ProductId(2), 2).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::InsufficientStock {
                product: ProductId(2),
                requested: 2,
                available: 1
            }
        );

        let summary = store.dashboard_summary(StatsWindow::Today).await.unwrap();
        assert_eq!(
            summary,
            DashboardSummary {
                products: 2,
                units_in_stock: 5,
                low_stock: 2,
                sales: 1,
                units_sold: 6,
                revenue: 60_000,
            }
        );
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = InMemoryStore::new(Duration::ZERO);
        store.set_unavailable(true);

        let err = store.distinct_colors("Rocket").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.queries(), 1);

        store.set_unavailable(false);
        assert!(store.distinct_colors("Rocket").await.unwrap().is_empty());
    }
}
